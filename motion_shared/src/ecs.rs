//! Minimal entity store for hosts and tests.
//!
//! Components live in typed maps keyed by entity id. The movement core never
//! touches [`World`] directly; it reads and writes poses through
//! [`TransformSink`], which `World` implements via [`Location`].

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Entity store with one `HashMap` per component type.
#[derive(Default)]
pub struct World {
    next_id: u64,
    storages: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

type Storage<T> = HashMap<EntityId, T>;

impl World {
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    fn storage<T: 'static + Send + Sync>(&self) -> Option<&Storage<T>> {
        self.storages.get(&TypeId::of::<T>())?.downcast_ref()
    }

    fn storage_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut Storage<T>> {
        self.storages.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    /// Inserts or replaces `entity`'s component of type `T`.
    pub fn insert<T: 'static + Send + Sync>(&mut self, entity: EntityId, component: T) {
        let boxed = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Storage::<T>::new()));
        // Keyed by `TypeId::of::<T>()`, so the downcast always succeeds.
        if let Some(storage) = boxed.downcast_mut::<Storage<T>>() {
            storage.insert(entity, component);
        }
    }

    pub fn remove<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<T> {
        self.storage_mut::<T>()?.remove(&entity)
    }

    pub fn get<T: 'static + Send + Sync>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>()?.get(&entity)
    }

    pub fn get_mut<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage_mut::<T>()?.get_mut(&entity)
    }

    pub fn has<T: 'static + Send + Sync>(&self, entity: EntityId) -> bool {
        self.get::<T>(entity).is_some()
    }
}

/// World transform of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Marks an entity as a movable character with a physics body that others
/// can collide with. The body follows the rendered pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CharacterBody {
    pub position: Vec3,
}

/// Where computed poses go, and where initial poses come from.
pub trait TransformSink {
    fn push_pose(&mut self, entity: EntityId, position: Vec3, rotation: Quat);

    fn read_pose(&self, entity: EntityId) -> Option<(Vec3, Quat)>;

    /// Moves the entity's collider to `position`, if it has one.
    fn sync_character_body(&mut self, _entity: EntityId, _position: Vec3) {}
}

impl TransformSink for World {
    fn push_pose(&mut self, entity: EntityId, position: Vec3, rotation: Quat) {
        match self.get_mut::<Location>(entity) {
            Some(loc) => {
                loc.position = position;
                loc.rotation = rotation;
            }
            None => self.insert(entity, Location { position, rotation }),
        }
    }

    fn read_pose(&self, entity: EntityId) -> Option<(Vec3, Quat)> {
        self.get::<Location>(entity).map(|loc| (loc.position, loc.rotation))
    }

    fn sync_character_body(&mut self, entity: EntityId, position: Vec3) {
        if !self.has::<Location>(entity) {
            return;
        }
        if let Some(body) = self.get_mut::<CharacterBody>(entity) {
            body.position = position;
        }
    }
}
