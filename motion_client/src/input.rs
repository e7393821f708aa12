//! Input handling.
//!
//! In a real game this would integrate with windowing, raw mouse/keyboard and
//! action bindings. Here it turns per-tick input state into sequenced
//! `InputSample`s for the predictor.

use motion_shared::{
    math::{Quat, Vec3},
    state::InputSample,
};
use serde::{Deserialize, Serialize};

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputState {
    pub forward: f32,
    pub right: f32,
    pub up: f32,
    /// Look yaw in degrees.
    pub yaw: f32,
    /// Look pitch in degrees.
    pub pitch: f32,
    pub running: bool,
    pub crouching: bool,
    pub jump: bool,
}

impl InputState {
    /// Desired movement in world space: forward is -z before the yaw turn.
    pub fn wish_vector(self) -> Vec3 {
        let local = Vec3::new(self.right, self.up, -self.forward);
        Quat::from_yaw_degrees(self.yaw).rotate(local)
    }
}

/// Hands out increasing sequence numbers. Sequence 0 belongs to the spawn
/// state, so the first sample is 1.
#[derive(Debug, Clone)]
pub struct InputSampler {
    next_sequence: u32,
}

impl Default for InputSampler {
    fn default() -> Self {
        Self { next_sequence: 1 }
    }
}

impl InputSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn sample(&mut self, input: InputState, delta_ms: u32) -> InputSample {
        let sample = build_sample(self.next_sequence, delta_ms, input);
        self.next_sequence += 1;
        sample
    }
}

/// Turns sampled input into an `InputSample` for a tick.
pub fn build_sample(sequence_number: u32, delta_ms: u32, input: InputState) -> InputSample {
    let mut sample = InputSample::new(sequence_number, delta_ms)
        .with_direction(input.wish_vector())
        .with_look(input.yaw, input.pitch);
    sample.running = input.running;
    sample.crouching = input.crouching;
    sample.jump_requested = input.jump;
    sample
}
