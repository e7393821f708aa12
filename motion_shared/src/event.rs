//! Event and messaging system.
//!
//! This is a small typed event bus.
//! - Stepping produces `MovementEvent`s only on an input's first application;
//!   the owner of the step forwards them to an [`EventSink`].
//! - The bus is the default sink: it queues `CharacterEvent`s until a system
//!   drains them (audio, effects, gameplay reactions).

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

use crate::{
    ecs::EntityId,
    math::{Vec3, Vec3i},
};

/// Side effect of a physics step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MovementEvent {
    Moved { delta: Vec3, position: Vec3 },
    Footstep,
    SwimStroke,
    Jump,
    /// Touched down after being airborne; velocity is at the moment of impact.
    Landed { velocity: Vec3 },
    /// Struck a ceiling while rising.
    HitCeiling { velocity: Vec3 },
    HorizontalCollision { position: Vec3, velocity: Vec3 },
    EnterLiquid,
    LeaveLiquid,
    /// A body slice (offset up from the feet) moved into a different block.
    EnterBlock { from: Vec3i, to: Vec3i, offset: i32 },
}

/// Movement event attributed to a character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterEvent {
    pub entity: EntityId,
    pub event: MovementEvent,
}

/// Receiver for movement side effects.
pub trait EventSink {
    fn emit(&mut self, entity: EntityId, event: MovementEvent);

    fn emit_all(&mut self, entity: EntityId, events: &[MovementEvent]) {
        for event in events {
            self.emit(entity, *event);
        }
    }
}

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        if let Some(q) = q.downcast_mut::<Vec<E>>() {
            q.push(e);
        }
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }

    /// Number of queued events of a type.
    pub fn pending<E: 'static + Send + Sync>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<Vec<E>>())
            .map_or(0, Vec::len)
    }
}

impl EventSink for EventBus {
    fn emit(&mut self, entity: EntityId, event: MovementEvent) {
        self.push(CharacterEvent { entity, event });
    }
}

/// Sink that drops everything, for headless replays and tests.
#[derive(Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _entity: EntityId, _event: MovementEvent) {}
}
