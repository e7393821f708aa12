//! Interpolation.
//!
//! The server sends discrete states at replication boundaries.
//! The client renders every other character a fixed delay behind and
//! interpolates between the buffered states.

use std::collections::BTreeMap;

use motion_shared::{
    config::HISTORY_CAPACITY,
    ecs::{EntityId, TransformSink},
    error::MovementResult,
    history::StateHistory,
    interp::{self, Sample},
    state::PhysicalState,
};
use tracing::trace;

/// Buffered state histories for remote characters.
#[derive(Debug, Clone)]
pub struct RemoteInterpolator {
    histories: BTreeMap<EntityId, StateHistory>,
    capacity: usize,
}

impl Default for RemoteInterpolator {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl RemoteInterpolator {
    pub fn new(capacity: usize) -> Self {
        Self {
            histories: BTreeMap::new(),
            capacity,
        }
    }

    /// Buffers an authoritative state verbatim.
    pub fn on_remote_state(&mut self, entity: EntityId, state: PhysicalState) -> MovementResult<()> {
        let capacity = self.capacity;
        self.histories
            .entry(entity)
            .or_insert_with(|| StateHistory::with_capacity(capacity))
            .append(state)
    }

    pub fn history(&self, entity: EntityId) -> Option<&StateHistory> {
        self.histories.get(&entity)
    }

    pub fn remove(&mut self, entity: EntityId) {
        self.histories.remove(&entity);
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }

    /// Number of characters being tracked.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Samples one character at `render_time` and pushes the pose. Returns
    /// `None`, touching nothing, when there is nothing old enough to show.
    pub fn render_at(
        &self,
        entity: EntityId,
        render_time: i64,
        transforms: &mut dyn TransformSink,
    ) -> Option<Sample> {
        let sample = interp::sample(self.histories.get(&entity)?, render_time)?;
        let state = sample.state();
        transforms.push_pose(entity, state.position, state.rotation);
        transforms.sync_character_body(entity, state.position);
        Some(sample)
    }

    /// Renders every tracked character; returns how many were updated.
    pub fn render_all(&self, render_time: i64, transforms: &mut dyn TransformSink) -> usize {
        let mut rendered = 0;
        for entity in self.histories.keys() {
            if self.render_at(*entity, render_time, transforms).is_some() {
                rendered += 1;
            } else {
                trace!(entity = ?entity, render_time, "nothing to render yet");
            }
        }
        rendered
    }
}
