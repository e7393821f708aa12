//! Configuration system.
//!
//! Loads movement configuration from JSON strings (file IO left to app).
//! Every field has a default so partial documents are accepted.

use serde::{Deserialize, Serialize};

use crate::physics::PhysicsConfig;

/// Capacity of every per-character state history.
pub const HISTORY_CAPACITY: usize = 128;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Simulation time between authoritative broadcasts.
    pub replicate_interval_ms: i64,
    /// How far past `now` an input may claim to end before it is dropped.
    pub max_input_overflow_ms: i64,
    /// Silence after which the server repeats a client's last input.
    pub max_input_underflow_ms: i64,
    /// How far behind `now` remote characters are rendered.
    pub render_delay_ms: i64,
    /// Entries kept per character history.
    pub history_capacity: usize,
    pub physics: PhysicsConfig,
    /// Default tuning for characters that are not given their own.
    pub character: CharacterConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            replicate_interval_ms: 50,
            max_input_overflow_ms: 100,
            max_input_underflow_ms: 100,
            render_delay_ms: 100,
            history_capacity: HISTORY_CAPACITY,
            physics: PhysicsConfig::default(),
            character: CharacterConfig::default(),
        }
    }
}

impl MotionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Per-character movement tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    pub height: f32,
    pub radius: f32,
    pub speed_multiplier: f32,
    pub run_factor: f32,
    pub crouch_factor: f32,
    pub jump_speed: f32,
    pub step_height: f32,
    /// Cosine of the steepest walkable slope.
    pub slope_factor: f32,
    pub distance_between_footsteps: f32,
    pub distance_between_swim_strokes: f32,
    /// Turn the body toward the velocity instead of the look yaw.
    pub face_movement_direction: bool,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            height: 1.6,
            radius: 0.3,
            speed_multiplier: 1.0,
            run_factor: 1.5,
            crouch_factor: 0.5,
            jump_speed: 10.0,
            step_height: 0.35,
            slope_factor: 0.6,
            distance_between_footsteps: 1.0,
            distance_between_swim_strokes: 2.0,
            face_movement_direction: false,
        }
    }
}
