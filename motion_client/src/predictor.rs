//! Local prediction and reconciliation.
//!
//! The predictor steps the local character the moment input is sampled, keeps
//! every sample the server has not acknowledged, and on each authoritative
//! state rewinds to it and replays what is left. Every other character goes
//! through the [`RemoteInterpolator`].

use std::collections::VecDeque;

use motion_shared::{
    config::{CharacterConfig, MotionConfig},
    ecs::{EntityId, TransformSink},
    error::{MovementError, MovementResult},
    event::EventSink,
    physics::{step_in, MovementEnvironment, PhysicsConfig},
    state::{InputSample, PhysicalState},
};
use tracing::{debug, info, trace};

use crate::interp::RemoteInterpolator;

/// Predictor lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictorState {
    Uninitialized,
    Predicting(Prediction),
}

/// Live prediction for the local character.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub entity: EntityId,
    pub predicted: PhysicalState,
    /// Most recent state received from the server.
    pub authoritative: Option<PhysicalState>,
}

pub struct ClientPredictor {
    state: PredictorState,
    character: CharacterConfig,
    physics: PhysicsConfig,
    render_delay_ms: i64,
    pending: VecDeque<InputSample>,
    remote: RemoteInterpolator,
}

impl ClientPredictor {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            state: PredictorState::Uninitialized,
            character: config.character,
            physics: config.physics,
            render_delay_ms: config.render_delay_ms,
            pending: VecDeque::new(),
            remote: RemoteInterpolator::new(config.history_capacity),
        }
    }

    /// Overrides the tuning of the local character.
    pub fn with_character(mut self, character: CharacterConfig) -> Self {
        self.character = character;
        self
    }

    pub fn state(&self) -> &PredictorState {
        &self.state
    }

    pub fn is_predicting(&self) -> bool {
        matches!(self.state, PredictorState::Predicting(_))
    }

    /// The local character, once activated.
    pub fn entity(&self) -> Option<EntityId> {
        match &self.state {
            PredictorState::Predicting(p) => Some(p.entity),
            PredictorState::Uninitialized => None,
        }
    }

    pub fn predicted(&self) -> MovementResult<&PhysicalState> {
        Ok(&self.prediction()?.predicted)
    }

    pub fn authoritative(&self) -> Option<&PhysicalState> {
        match &self.state {
            PredictorState::Predicting(p) => p.authoritative.as_ref(),
            PredictorState::Uninitialized => None,
        }
    }

    /// Inputs not yet acknowledged by the server, oldest first.
    pub fn pending_inputs(&self) -> impl Iterator<Item = &InputSample> + '_ {
        self.pending.iter()
    }

    pub fn remote(&self) -> &RemoteInterpolator {
        &self.remote
    }

    fn prediction(&self) -> MovementResult<&Prediction> {
        match &self.state {
            PredictorState::Predicting(p) => Ok(p),
            PredictorState::Uninitialized => Err(MovementError::NotPredicting),
        }
    }

    fn prediction_mut(&mut self) -> MovementResult<&mut Prediction> {
        match &mut self.state {
            PredictorState::Predicting(p) => Ok(p),
            PredictorState::Uninitialized => Err(MovementError::NotPredicting),
        }
    }

    /// Starts predicting `entity` from its current transform.
    pub fn activate(&mut self, entity: EntityId, now: i64, transforms: &dyn TransformSink) -> MovementResult<()> {
        let (position, rotation) = transforms
            .read_pose(entity)
            .ok_or(MovementError::UnknownCharacter(entity))?;
        self.pending.clear();
        self.state = PredictorState::Predicting(Prediction {
            entity,
            predicted: PhysicalState::spawn(position, rotation, now),
            authoritative: None,
        });
        info!(entity = ?entity, "prediction started");
        Ok(())
    }

    /// Drops all local and remote buffers. Safe to call repeatedly.
    pub fn deactivate(&mut self) {
        if let PredictorState::Predicting(p) = &self.state {
            info!(entity = ?p.entity, pending = self.pending.len(), "prediction stopped");
        }
        self.state = PredictorState::Uninitialized;
        self.pending.clear();
        self.remote.clear();
    }

    /// Steps a freshly sampled input, shows the result, and queues the input
    /// for replay.
    pub fn on_local_input<E: MovementEnvironment>(
        &mut self,
        mut input: InputSample,
        env: &E,
        transforms: &mut dyn TransformSink,
        events: &mut dyn EventSink,
    ) -> MovementResult<&PhysicalState> {
        input.is_first_application = true;
        let character = self.character;
        let physics = self.physics;
        let prediction = self.prediction_mut()?;

        let outcome = step_in(env, &prediction.predicted, &input, &character, &physics);
        prediction.predicted = outcome.state;
        transforms.push_pose(prediction.entity, outcome.state.position, outcome.state.rotation);
        events.emit_all(prediction.entity, &outcome.events);
        trace!(entity = ?prediction.entity, seq = input.sequence_number, "predicted");

        let mut queued = input;
        queued.run_complete();
        self.pending.push_back(queued);

        self.predicted()
    }

    /// Rewinds to `server_state` and replays unacknowledged input.
    ///
    /// The prediction snaps to the replayed result.
    pub fn on_authoritative_state<E: MovementEnvironment>(
        &mut self,
        server_state: PhysicalState,
        env: &E,
        transforms: &mut dyn TransformSink,
    ) -> MovementResult<&PhysicalState> {
        let character = self.character;
        let physics = self.physics;

        let before = self.pending.len();
        self.pending
            .retain(|input| input.sequence_number > server_state.sequence_number);

        let prediction = match &mut self.state {
            PredictorState::Predicting(p) => p,
            PredictorState::Uninitialized => return Err(MovementError::NotPredicting),
        };
        prediction.authoritative = Some(server_state);

        let mut state = server_state;
        for input in &self.pending {
            state = step_in(env, &state, input, &character, &physics).state;
        }

        if state != prediction.predicted {
            debug!(
                entity = ?prediction.entity,
                acked = server_state.sequence_number,
                pruned = before - self.pending.len(),
                replayed = self.pending.len(),
                "prediction corrected"
            );
        }
        prediction.predicted = state;
        transforms.push_pose(prediction.entity, state.position, state.rotation);

        self.predicted()
    }

    /// Buffers a state for a character other than the local one.
    pub fn on_remote_authoritative_state(&mut self, entity: EntityId, state: PhysicalState) -> MovementResult<()> {
        self.remote.on_remote_state(entity, state)
    }

    /// Renders every remote character at `now` minus the render delay.
    pub fn render_remote(&self, now: i64, transforms: &mut dyn TransformSink) -> usize {
        self.remote.render_all(now - self.render_delay_ms, transforms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_shared::{
        ecs::World,
        event::{CharacterEvent, EventBus, MovementEvent, NullSink},
        math::{Quat, Vec3, Vec3i},
        physics::voxel::{Block, VoxelWorld},
    };

    const DT: u32 = 16;

    fn setup() -> (VoxelWorld, World, EntityId, ClientPredictor) {
        let mut voxels = VoxelWorld::new();
        voxels.fill(Vec3i::new(-20, 0, -20), Vec3i::new(20, 0, 20), Block::Solid);
        let mut world = World::default();
        let e = world.spawn();
        world.push_pose(e, Vec3::new(0.0, 1.5, 0.0), Quat::IDENTITY);
        let mut predictor = ClientPredictor::new(&MotionConfig::default());
        predictor.activate(e, 0, &world).unwrap();
        (voxels, world, e, predictor)
    }

    fn walk(seq: u32) -> InputSample {
        InputSample::new(seq, DT).with_direction(Vec3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn inputs_before_activation_are_refused() {
        let voxels = VoxelWorld::new();
        let mut world = World::default();
        let mut predictor = ClientPredictor::new(&MotionConfig::default());
        let err = predictor
            .on_local_input(walk(1), &voxels, &mut world, &mut NullSink)
            .unwrap_err();
        assert_eq!(err, MovementError::NotPredicting);
        assert_eq!(
            predictor.activate(EntityId(7), 0, &world),
            Err(MovementError::UnknownCharacter(EntityId(7)))
        );
    }

    #[test]
    fn local_input_moves_immediately_and_queues() {
        let (voxels, mut world, e, mut predictor) = setup();
        let mut bus = EventBus::default();
        for seq in 1..=5 {
            predictor.on_local_input(walk(seq), &voxels, &mut world, &mut bus).unwrap();
        }
        let predicted = *predictor.predicted().unwrap();
        assert_eq!(predicted.sequence_number, 5);
        assert_eq!(world.read_pose(e).unwrap().0, predicted.position);
        assert_eq!(predictor.pending_inputs().count(), 5);
        assert!(predictor.pending_inputs().all(|i| !i.is_first_application));
        assert!(bus
            .drain::<CharacterEvent>()
            .iter()
            .any(|ev| ev.entity == e && matches!(ev.event, MovementEvent::Moved { .. })));
    }

    #[test]
    fn live_step_always_counts_as_first_application() {
        let (voxels, mut world, e, mut predictor) = setup();
        let mut bus = EventBus::default();
        let mut reused = walk(1);
        reused.run_complete();
        predictor.on_local_input(reused, &voxels, &mut world, &mut bus).unwrap();
        assert!(bus
            .drain::<CharacterEvent>()
            .iter()
            .any(|ev| ev.entity == e && matches!(ev.event, MovementEvent::Moved { .. })));
        assert!(predictor.pending_inputs().all(|i| !i.is_first_application));
    }

    #[test]
    fn matching_server_state_keeps_prediction() {
        let (voxels, mut world, _, mut predictor) = setup();
        // The server runs the same steps from the same spawn.
        let mut server = PhysicalState::spawn(Vec3::new(0.0, 1.5, 0.0), Quat::IDENTITY, 0);
        let config = MotionConfig::default();
        let mut acked = server;
        for seq in 1..=10 {
            predictor.on_local_input(walk(seq), &voxels, &mut world, &mut NullSink).unwrap();
            server = step_in(&voxels, &server, &walk(seq), &config.character, &config.physics).state;
            if seq == 4 {
                acked = server;
            }
        }
        let live = *predictor.predicted().unwrap();

        let reconciled = *predictor.on_authoritative_state(acked, &voxels, &mut world).unwrap();
        assert_eq!(reconciled, live);
        assert_eq!(predictor.pending_inputs().count(), 6);
        assert_eq!(predictor.pending_inputs().next().unwrap().sequence_number, 5);
        assert_eq!(predictor.authoritative(), Some(&acked));
    }

    #[test]
    fn correction_snaps_to_replayed_result() {
        let (voxels, mut world, e, mut predictor) = setup();
        for seq in 1..=6 {
            predictor.on_local_input(walk(seq), &voxels, &mut world, &mut NullSink).unwrap();
        }
        // Server says we were somewhere else at seq 3.
        let mut server = PhysicalState::spawn(Vec3::new(5.0, 1.5, 5.0), Quat::IDENTITY, 48);
        server.sequence_number = 3;

        let reconciled = *predictor.on_authoritative_state(server, &voxels, &mut world).unwrap();
        assert_eq!(reconciled.sequence_number, 6);
        assert!(reconciled.position.x > 4.0);
        assert_eq!(world.read_pose(e).unwrap().0, reconciled.position);
        assert_eq!(predictor.pending_inputs().count(), 3);
    }

    #[test]
    fn full_ack_empties_queue() {
        let (voxels, mut world, _, mut predictor) = setup();
        for seq in 1..=3 {
            predictor.on_local_input(walk(seq), &voxels, &mut world, &mut NullSink).unwrap();
        }
        let mut server = *predictor.predicted().unwrap();
        server.sequence_number = 9;
        let reconciled = *predictor.on_authoritative_state(server, &voxels, &mut world).unwrap();
        assert_eq!(reconciled, server);
        assert_eq!(predictor.pending_inputs().count(), 0);
    }

    #[test]
    fn deactivate_is_idempotent() {
        let (voxels, mut world, _, mut predictor) = setup();
        predictor.on_local_input(walk(1), &voxels, &mut world, &mut NullSink).unwrap();
        predictor
            .on_remote_authoritative_state(EntityId(50), PhysicalState::spawn(Vec3::ZERO, Quat::IDENTITY, 0))
            .unwrap();

        predictor.deactivate();
        predictor.deactivate();
        assert!(!predictor.is_predicting());
        assert_eq!(predictor.entity(), None);
        assert_eq!(predictor.pending_inputs().count(), 0);
        assert!(predictor.remote().is_empty());
        assert_eq!(predictor.predicted(), Err(MovementError::NotPredicting));
    }

    #[test]
    fn remote_characters_render_behind_now() {
        let (_, mut world, _, mut predictor) = setup();
        let other = world.spawn();
        for (i, t) in [0i64, 50, 100].into_iter().enumerate() {
            let mut s = PhysicalState::spawn(Vec3::new(t as f32 / 10.0, 1.5, 0.0), Quat::IDENTITY, t);
            s.sequence_number = i as u32;
            predictor.on_remote_authoritative_state(other, s).unwrap();
        }
        // Rendered 100 ms behind: now=175 samples t=75.
        assert_eq!(predictor.render_remote(175, &mut world), 1);
        let (pos, _) = world.read_pose(other).unwrap();
        assert!((pos.x - 7.5).abs() < 1e-5);
    }
}
