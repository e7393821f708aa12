//! Authoritative movement.
//!
//! The authority owns the canonical history of every character it
//! simulates. It:
//! - Steps client input as it arrives, refusing input that claims to end too
//!   far in the future.
//! - Applies privileged overrides (mode changes, teleports).
//! - Every replication interval, broadcasts states that changed and keeps
//!   silent clients' characters moving by repeating their last input.
//!
//! Determinism notes:
//! - `now` is always passed in; nothing reads a wall clock.
//! - Characters are kept in a `BTreeMap` so iteration order is stable.

use std::collections::BTreeMap;

use motion_shared::{
    config::{CharacterConfig, MotionConfig},
    ecs::{EntityId, TransformSink},
    error::{MovementError, MovementResult},
    event::EventSink,
    history::StateHistory,
    interp,
    math::Vec3,
    net::ClientId,
    physics::{step_in, MovementEnvironment},
    state::{InputSample, MovementMode, PhysicalState},
};
use tracing::{debug, info, trace, warn};

/// One outgoing authoritative state.
#[derive(Debug, Clone, PartialEq)]
pub struct Replication {
    pub entity: EntityId,
    pub state: PhysicalState,
    /// Owning client, if the character is player-controlled.
    pub owner: Option<ClientId>,
    /// Do not send to `owner`: the state came from a repeated input the
    /// owner never sent.
    pub skip_owner: bool,
}

/// Per-character authority bookkeeping.
#[derive(Debug, Clone)]
struct AuthorityEntry {
    history: StateHistory,
    last_input: Option<InputSample>,
    collider_ready: bool,
    character: CharacterConfig,
    owner: Option<ClientId>,
    /// Bumped on every append.
    revision: u64,
    /// Revision of the last broadcast state.
    broadcast_revision: u64,
}

impl AuthorityEntry {
    fn append(&mut self, state: PhysicalState) -> MovementResult<()> {
        self.history.append(state)?;
        self.revision += 1;
        Ok(())
    }
}

pub struct ServerAuthority {
    config: MotionConfig,
    characters: BTreeMap<EntityId, AuthorityEntry>,
    /// Time of the previous replication pass.
    last_replicate: Option<i64>,
}

impl ServerAuthority {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            characters: BTreeMap::new(),
            last_replicate: None,
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Starts tracking `entity` from its current transform. The collider is
    /// not ready until [`Self::mark_collider_ready`] is called.
    pub fn add_character(
        &mut self,
        entity: EntityId,
        owner: Option<ClientId>,
        character: CharacterConfig,
        now: i64,
        transforms: &dyn TransformSink,
    ) -> MovementResult<()> {
        let (position, rotation) = transforms
            .read_pose(entity)
            .ok_or(MovementError::UnknownCharacter(entity))?;
        let mut history = StateHistory::with_capacity(self.config.history_capacity);
        history.append(PhysicalState::spawn(position, rotation, now))?;
        self.characters.insert(
            entity,
            AuthorityEntry {
                history,
                last_input: None,
                collider_ready: false,
                character,
                owner,
                // The spawn state still needs to go out.
                revision: 1,
                broadcast_revision: 0,
            },
        );
        info!(entity = ?entity, owner = ?owner, "character added");
        Ok(())
    }

    /// Drops the character and its history. Returns whether it was tracked.
    pub fn remove_character(&mut self, entity: EntityId) -> bool {
        let removed = self.characters.remove(&entity).is_some();
        if removed {
            info!(entity = ?entity, "character removed");
        }
        removed
    }

    pub fn mark_collider_ready(&mut self, entity: EntityId) -> MovementResult<()> {
        self.entry_mut(entity)?.collider_ready = true;
        Ok(())
    }

    pub fn characters(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.characters.keys().copied()
    }

    pub fn owner(&self, entity: EntityId) -> MovementResult<Option<ClientId>> {
        Ok(self.entry(entity)?.owner)
    }

    pub fn history(&self, entity: EntityId) -> MovementResult<&StateHistory> {
        Ok(&self.entry(entity)?.history)
    }

    pub fn last_state(&self, entity: EntityId) -> MovementResult<&PhysicalState> {
        self.entry(entity)?.history.last()
    }

    fn entry(&self, entity: EntityId) -> MovementResult<&AuthorityEntry> {
        self.characters
            .get(&entity)
            .ok_or(MovementError::UnknownCharacter(entity))
    }

    fn entry_mut(&mut self, entity: EntityId) -> MovementResult<&mut AuthorityEntry> {
        self.characters
            .get_mut(&entity)
            .ok_or(MovementError::UnknownCharacter(entity))
    }

    /// Steps one client input on top of the last authoritative state.
    ///
    /// Input at or below the last applied sequence was already applied and
    /// is ignored. Rejected input leaves the character untouched.
    pub fn on_client_input<E: MovementEnvironment>(
        &mut self,
        entity: EntityId,
        input: InputSample,
        now: i64,
        env: &E,
        transforms: &mut dyn TransformSink,
        events: &mut dyn EventSink,
    ) -> MovementResult<&PhysicalState> {
        let last_seq = self.last_state(entity)?.sequence_number;
        if input.sequence_number <= last_seq {
            trace!(entity = ?entity, seq = input.sequence_number, last_seq, "input already applied");
            return self.last_state(entity);
        }
        self.apply_input(entity, input, now, env, transforms, events)
    }

    /// Input path shared with gap filling, which repeats the last sequence.
    fn apply_input<E: MovementEnvironment>(
        &mut self,
        entity: EntityId,
        input: InputSample,
        now: i64,
        env: &E,
        transforms: &mut dyn TransformSink,
        events: &mut dyn EventSink,
    ) -> MovementResult<&PhysicalState> {
        let physics = self.config.physics;
        let overflow = self.config.max_input_overflow_ms;
        let entry = self.entry_mut(entity)?;

        if !entry.collider_ready {
            warn!(entity = ?entity, seq = input.sequence_number, "input before collider is ready, dropped");
            return Err(MovementError::ColliderPending(entity));
        }

        let last = *entry.history.last()?;
        let claimed = last.timestamp + i64::from(input.delta_ms);
        let limit = now + overflow;
        if claimed > limit {
            warn!(entity = ?entity, seq = input.sequence_number, claimed, limit, "input runs ahead of server time, dropped");
            return Err(MovementError::InputOverflow { entity, claimed, limit });
        }

        let outcome = step_in(env, &last, &input, &entry.character, &physics);
        if let Err(err) = entry.append(outcome.state) {
            warn!(entity = ?entity, error = %err, "stale input, dropped");
            return Err(err);
        }
        transforms.push_pose(entity, outcome.state.position, outcome.state.rotation);
        events.emit_all(entity, &outcome.events);
        trace!(entity = ?entity, seq = input.sequence_number, "input applied");

        entry.last_input = Some(input);
        entry.history.last()
    }

    /// Forces a movement mode, keeping everything else.
    pub fn set_movement_mode(
        &mut self,
        entity: EntityId,
        mode: MovementMode,
        now: i64,
        transforms: &mut dyn TransformSink,
    ) -> MovementResult<&PhysicalState> {
        info!(entity = ?entity, mode = ?mode, "movement mode set");
        self.override_state(entity, now, transforms, |state| {
            state.mode = mode;
            if mode != MovementMode::Climbing {
                state.climb_direction = None;
            }
        })
    }

    /// Moves the character instantly and stops it.
    pub fn teleport(
        &mut self,
        entity: EntityId,
        position: Vec3,
        now: i64,
        transforms: &mut dyn TransformSink,
    ) -> MovementResult<&PhysicalState> {
        info!(entity = ?entity, ?position, "teleport");
        self.override_state(entity, now, transforms, |state| {
            state.position = position;
            state.velocity = Vec3::ZERO;
        })
    }

    /// Appends a copy of the last state with `edit` applied. The sequence is
    /// kept so the owner's pending inputs still line up.
    fn override_state(
        &mut self,
        entity: EntityId,
        now: i64,
        transforms: &mut dyn TransformSink,
        edit: impl FnOnce(&mut PhysicalState),
    ) -> MovementResult<&PhysicalState> {
        let entry = self.entry_mut(entity)?;
        let mut state = *entry.history.last()?;
        state.timestamp = now.max(state.timestamp);
        edit(&mut state);
        entry.append(state)?;
        transforms.push_pose(entity, state.position, state.rotation);
        entry.history.last()
    }

    /// Replication pass. Does nothing until a full interval has passed since
    /// the previous one. Each character's newest state goes out once; a
    /// character with nothing new and no input for too long is stepped on
    /// its last input instead.
    pub fn update<E: MovementEnvironment>(
        &mut self,
        now: i64,
        env: &E,
        transforms: &mut dyn TransformSink,
        events: &mut dyn EventSink,
    ) -> Vec<Replication> {
        if let Some(previous) = self.last_replicate {
            if now - previous < self.config.replicate_interval_ms {
                return Vec::new();
            }
        }
        self.last_replicate = Some(now);

        let underflow = self.config.max_input_underflow_ms;
        let entities: Vec<EntityId> = self.characters.keys().copied().collect();
        let mut out = Vec::new();

        for entity in entities {
            let Some(entry) = self.characters.get_mut(&entity) else {
                continue;
            };
            let Ok(last) = entry.history.last() else {
                continue;
            };
            let last = *last;
            let owner = entry.owner;

            if entry.revision > entry.broadcast_revision {
                entry.broadcast_revision = entry.revision;
                out.push(Replication {
                    entity,
                    state: last,
                    owner,
                    skip_owner: false,
                });
                continue;
            }

            if now - last.timestamp <= underflow {
                continue;
            }

            // Silent client: keep the character moving on its last intent.
            let gap = u32::try_from(now - last.timestamp).unwrap_or(u32::MAX);
            let input = match &entry.last_input {
                Some(previous) => previous.repeated(gap),
                None => InputSample::new(last.sequence_number, gap),
            };
            debug!(entity = ?entity, gap_ms = gap, seq = input.sequence_number, "repeating last input");

            match self.apply_input(entity, input, now, env, transforms, events) {
                Ok(state) => {
                    let state = *state;
                    if let Some(entry) = self.characters.get_mut(&entity) {
                        entry.broadcast_revision = entry.revision;
                    }
                    out.push(Replication {
                        entity,
                        state,
                        owner,
                        skip_owner: true,
                    });
                }
                Err(err) => debug!(entity = ?entity, error = %err, "gap fill skipped"),
            }
        }
        out
    }

    /// Pushes delayed, interpolated poses for characters not owned by
    /// `viewpoint`. Returns how many were rendered.
    pub fn render(&self, now: i64, viewpoint: Option<ClientId>, transforms: &mut dyn TransformSink) -> usize {
        let render_time = now - self.config.render_delay_ms;
        let mut rendered = 0;
        for (entity, entry) in &self.characters {
            if viewpoint.is_some() && entry.owner == viewpoint {
                continue;
            }
            if let Some(sample) = interp::sample(&entry.history, render_time) {
                let state = sample.state();
                transforms.push_pose(*entity, state.position, state.rotation);
                transforms.sync_character_body(*entity, state.position);
                rendered += 1;
            }
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_shared::{
        ecs::World,
        event::{CharacterEvent, EventBus, NullSink},
        math::{Quat, Vec3i},
        physics::voxel::{Block, VoxelWorld},
    };

    const DT: u32 = 16;

    fn setup() -> (VoxelWorld, World, EntityId, ServerAuthority) {
        let mut voxels = VoxelWorld::new();
        voxels.fill(Vec3i::new(-20, 0, -20), Vec3i::new(20, 0, 20), Block::Solid);
        let mut world = World::default();
        let e = world.spawn();
        world.push_pose(e, Vec3::new(0.0, 1.35, 0.0), Quat::IDENTITY);
        let mut authority = ServerAuthority::new(MotionConfig::default());
        authority
            .add_character(e, Some(ClientId(1)), CharacterConfig::default(), 0, &world)
            .unwrap();
        authority.mark_collider_ready(e).unwrap();
        (voxels, world, e, authority)
    }

    fn walk(seq: u32) -> InputSample {
        InputSample::new(seq, DT).with_direction(Vec3::new(1.0, 0.0, 0.0))
    }

    #[test]
    fn input_waits_for_collider() {
        let (voxels, mut world, _, mut authority) = setup();
        let other = world.spawn();
        world.push_pose(other, Vec3::new(3.0, 1.35, 0.0), Quat::IDENTITY);
        authority
            .add_character(other, Some(ClientId(2)), CharacterConfig::default(), 0, &world)
            .unwrap();

        let err = authority
            .on_client_input(other, walk(1), 16, &voxels, &mut world, &mut NullSink)
            .unwrap_err();
        assert_eq!(err, MovementError::ColliderPending(other));
        assert_eq!(authority.history(other).unwrap().len(), 1);
    }

    #[test]
    fn input_is_stepped_and_recorded() {
        let (voxels, mut world, e, mut authority) = setup();
        let mut bus = EventBus::default();
        for seq in 1..=3 {
            authority
                .on_client_input(e, walk(seq), i64::from(seq * DT), &voxels, &mut world, &mut bus)
                .unwrap();
        }
        let last = *authority.last_state(e).unwrap();
        assert_eq!(last.sequence_number, 3);
        assert_eq!(last.timestamp, 48);
        assert!(last.position.x > 0.0);
        assert_eq!(world.read_pose(e).unwrap().0, last.position);
        assert_eq!(authority.history(e).unwrap().len(), 4);
        assert!(bus.pending::<CharacterEvent>() > 0);
    }

    #[test]
    fn repeated_or_stale_input_is_ignored() {
        let (voxels, mut world, e, mut authority) = setup();
        let mut bus = EventBus::default();
        authority
            .on_client_input(e, walk(1), 16, &voxels, &mut world, &mut bus)
            .unwrap();
        authority
            .on_client_input(e, walk(2), 32, &voxels, &mut world, &mut bus)
            .unwrap();
        let applied = *authority.last_state(e).unwrap();
        let emitted = bus.pending::<CharacterEvent>();

        let again = *authority
            .on_client_input(e, walk(2), 48, &voxels, &mut world, &mut bus)
            .unwrap();
        assert_eq!(again, applied);
        let stale = *authority
            .on_client_input(e, walk(1), 48, &voxels, &mut world, &mut bus)
            .unwrap();
        assert_eq!(stale, applied);
        let spawn_seq = *authority
            .on_client_input(e, walk(0), 48, &voxels, &mut world, &mut bus)
            .unwrap();
        assert_eq!(spawn_seq, applied);

        assert_eq!(authority.history(e).unwrap().len(), 3);
        assert_eq!(bus.pending::<CharacterEvent>(), emitted);
    }

    #[test]
    fn overflowing_input_is_dropped() {
        let (voxels, mut world, e, mut authority) = setup();
        let before = authority.history(e).unwrap().len();
        let greedy = InputSample::new(1, 500);
        let err = authority
            .on_client_input(e, greedy, 0, &voxels, &mut world, &mut NullSink)
            .unwrap_err();
        assert_eq!(
            err,
            MovementError::InputOverflow {
                entity: e,
                claimed: 500,
                limit: 100
            }
        );
        assert_eq!(authority.history(e).unwrap().len(), before);

        // Exactly at the limit is fine.
        authority
            .on_client_input(e, InputSample::new(1, 100), 0, &voxels, &mut world, &mut NullSink)
            .unwrap();
    }

    #[test]
    fn unknown_character() {
        let (voxels, mut world, _, mut authority) = setup();
        let err = authority
            .on_client_input(EntityId(999), walk(1), 16, &voxels, &mut world, &mut NullSink)
            .unwrap_err();
        assert_eq!(err, MovementError::UnknownCharacter(EntityId(999)));
        assert!(!authority.remove_character(EntityId(999)));
    }

    #[test]
    fn teleport_keeps_sequence_and_stops() {
        let (voxels, mut world, e, mut authority) = setup();
        for seq in 1..=5 {
            authority
                .on_client_input(e, walk(seq), i64::from(seq * DT), &voxels, &mut world, &mut NullSink)
                .unwrap();
        }
        let target = Vec3::new(10.0, 1.35, -4.0);
        let state = *authority.teleport(e, target, 40, &mut world).unwrap();
        assert_eq!(state.sequence_number, 5);
        assert_eq!(state.timestamp, 80);
        assert_eq!(state.position, target);
        assert_eq!(state.velocity, Vec3::ZERO);
        assert_eq!(world.read_pose(e).unwrap().0, target);

        let state = *authority.set_movement_mode(e, MovementMode::Flying, 200, &mut world).unwrap();
        assert_eq!(state.mode, MovementMode::Flying);
        assert_eq!(state.timestamp, 200);
        assert_eq!(state.sequence_number, 5);
    }

    #[test]
    fn replication_is_throttled_and_only_sends_changes() {
        let (voxels, mut world, e, mut authority) = setup();
        let first = authority.update(0, &voxels, &mut world, &mut NullSink);
        assert_eq!(first.len(), 1);
        assert!(!first[0].skip_owner);

        authority
            .on_client_input(e, walk(1), 16, &voxels, &mut world, &mut NullSink)
            .unwrap();
        assert!(authority.update(30, &voxels, &mut world, &mut NullSink).is_empty());

        let second = authority.update(50, &voxels, &mut world, &mut NullSink);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].state.sequence_number, 1);

        // Nothing new and not yet silent for long enough.
        assert!(authority.update(100, &voxels, &mut world, &mut NullSink).is_empty());
    }

    #[test]
    fn silent_client_gets_repeated_input() {
        let (voxels, mut world, e, mut authority) = setup();
        authority
            .on_client_input(e, walk(1), 16, &voxels, &mut world, &mut NullSink)
            .unwrap();
        authority.update(16, &voxels, &mut world, &mut NullSink);

        let out = authority.update(200, &voxels, &mut world, &mut NullSink);
        assert_eq!(out.len(), 1);
        let rep = &out[0];
        assert!(rep.skip_owner);
        assert_eq!(rep.owner, Some(ClientId(1)));
        assert_eq!(rep.state.timestamp, 200);
        assert_eq!(rep.state.sequence_number, 1);
        assert!(rep.state.position.x > authority.history(e).unwrap().iter().nth(1).unwrap().position.x);
    }

    #[test]
    fn server_render_skips_viewpoint() {
        let (voxels, mut world, e, mut authority) = setup();
        let npc = world.spawn();
        world.push_pose(npc, Vec3::new(-3.0, 1.35, 0.0), Quat::IDENTITY);
        authority
            .add_character(npc, None, CharacterConfig::default(), 0, &world)
            .unwrap();
        authority.mark_collider_ready(npc).unwrap();
        for seq in 1..=20 {
            authority
                .on_client_input(e, walk(seq), i64::from(seq * DT), &voxels, &mut world, &mut NullSink)
                .unwrap();
        }
        let live = world.read_pose(e).unwrap().0;

        assert_eq!(authority.render(320, Some(ClientId(1)), &mut world), 1);
        assert_eq!(world.read_pose(e).unwrap().0, live);

        assert_eq!(authority.render(320, None, &mut world), 2);
        let delayed = world.read_pose(e).unwrap().0;
        assert!(delayed.x < live.x);
    }
}
