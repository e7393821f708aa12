//! Physical state and input sample types.
//!
//! `PhysicalState` is a `Copy` value: a step never edits the previous state,
//! it returns a new one. Histories keep the superseded values.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3, Vec3i};

bitflags! {
    /// Behavioural switches carried by a movement mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModeFlags: u8 {
        /// Movement is swept through the collider.
        const COLLISION = 1 << 0;
        /// A bottom hit counts as standing on ground.
        const GROUNDABLE = 1 << 1;
        /// Liquid and climbable blocks nearby may change the mode.
        const RESPONDS_TO_ENVIRONMENT = 1 << 2;
        /// The vertical axis is blended like the horizontal ones.
        const VERTICAL_INERTIA = 1 << 3;
    }
}

/// A named physical regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MovementMode {
    #[default]
    Walking,
    Climbing,
    Swimming,
    Diving,
    Flying,
    Ghosting,
    None,
}

impl MovementMode {
    pub const fn gravity_scale(self) -> f32 {
        match self {
            Self::Walking => 1.0,
            Self::Swimming => 0.05,
            Self::Climbing | Self::Diving | Self::Flying | Self::Ghosting | Self::None => 0.0,
        }
    }

    pub const fn inertia_scale(self) -> f32 {
        match self {
            Self::Walking | Self::Climbing => 8.0,
            Self::Swimming => 1.5,
            Self::Diving => 2.0,
            Self::Flying | Self::Ghosting => 4.0,
            Self::None => 0.0,
        }
    }

    pub const fn max_speed(self) -> f32 {
        match self {
            Self::Walking | Self::Ghosting => 5.0,
            Self::Climbing => 3.0,
            Self::Swimming | Self::Diving => 2.0,
            Self::Flying => 4.0,
            Self::None => 0.0,
        }
    }

    pub const fn flags(self) -> ModeFlags {
        match self {
            Self::Walking => ModeFlags::COLLISION
                .union(ModeFlags::GROUNDABLE)
                .union(ModeFlags::RESPONDS_TO_ENVIRONMENT),
            Self::Climbing => ModeFlags::COLLISION
                .union(ModeFlags::GROUNDABLE)
                .union(ModeFlags::RESPONDS_TO_ENVIRONMENT)
                .union(ModeFlags::VERTICAL_INERTIA),
            Self::Swimming | Self::Diving => ModeFlags::COLLISION
                .union(ModeFlags::RESPONDS_TO_ENVIRONMENT)
                .union(ModeFlags::VERTICAL_INERTIA),
            Self::Flying => ModeFlags::COLLISION.union(ModeFlags::VERTICAL_INERTIA),
            Self::Ghosting => ModeFlags::VERTICAL_INERTIA,
            Self::None => ModeFlags::empty(),
        }
    }

    pub const fn uses_collision(self) -> bool {
        self.flags().contains(ModeFlags::COLLISION)
    }

    pub const fn can_be_grounded(self) -> bool {
        self.flags().contains(ModeFlags::GROUNDABLE)
    }

    pub const fn responds_to_environment(self) -> bool {
        self.flags().contains(ModeFlags::RESPONDS_TO_ENVIRONMENT)
    }

    pub const fn is_in_liquid(self) -> bool {
        matches!(self, Self::Swimming | Self::Diving)
    }
}

/// Snapshot of a character's physical state at one simulation instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    /// Simulation clock, ms.
    pub timestamp: i64,
    /// Sequence number of the input that produced this state.
    pub sequence_number: u32,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub mode: MovementMode,
    pub grounded: bool,
    /// Fraction of the distance to the next footstep, in `[0, 1)`.
    pub footstep_accumulator: f32,
    /// Facing of the ladder being climbed; only set while climbing.
    pub climb_direction: Option<Vec3i>,
    /// Look pitch in degrees.
    pub pitch: f32,
    /// Look yaw in degrees.
    pub yaw: f32,
}

impl PhysicalState {
    /// Initial state for a freshly activated character.
    pub fn spawn(position: Vec3, rotation: Quat, now: i64) -> Self {
        Self {
            timestamp: now,
            sequence_number: 0,
            position,
            rotation,
            velocity: Vec3::ZERO,
            mode: MovementMode::Walking,
            grounded: false,
            footstep_accumulator: 0.0,
            climb_direction: None,
            pitch: 0.0,
            yaw: 0.0,
        }
    }
}

fn first_application() -> bool {
    true
}

/// One tick of character intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    pub sequence_number: u32,
    pub delta_ms: u32,
    /// Look pitch in degrees.
    pub pitch: f32,
    /// Look yaw in degrees.
    pub yaw: f32,
    /// Desired movement; lengths above 1 are clamped by the stepper.
    pub movement_direction: Vec3,
    pub running: bool,
    pub crouching: bool,
    pub jump_requested: bool,
    /// True until the sample has been stepped once. Receivers always see a
    /// fresh sample, so the flag is not part of the wire format.
    #[serde(skip, default = "first_application")]
    pub is_first_application: bool,
}

impl InputSample {
    pub fn new(sequence_number: u32, delta_ms: u32) -> Self {
        Self {
            sequence_number,
            delta_ms,
            pitch: 0.0,
            yaw: 0.0,
            movement_direction: Vec3::ZERO,
            running: false,
            crouching: false,
            jump_requested: false,
            is_first_application: true,
        }
    }

    pub fn with_direction(mut self, direction: Vec3) -> Self {
        self.movement_direction = direction;
        self
    }

    pub fn with_look(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    pub fn with_jump(mut self) -> Self {
        self.jump_requested = true;
        self
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_ms as f32 / 1000.0
    }

    /// Marks the sample as applied; later steps of it are replays.
    pub fn run_complete(&mut self) {
        self.is_first_application = false;
    }

    /// The same intent stretched over a different interval, used to keep a
    /// silent client's character moving.
    pub fn repeated(&self, delta_ms: u32) -> Self {
        Self {
            delta_ms,
            is_first_application: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_constants_match_flags() {
        assert!(MovementMode::Walking.can_be_grounded());
        assert!(!MovementMode::Swimming.can_be_grounded());
        assert!(!MovementMode::Ghosting.uses_collision());
        assert!(!MovementMode::Ghosting.responds_to_environment());
        assert!(MovementMode::Diving.is_in_liquid());
        assert_eq!(MovementMode::None.flags(), ModeFlags::empty());
    }

    #[test]
    fn input_first_application_is_not_serialized() {
        let mut input = InputSample::new(7, 16).with_direction(Vec3::new(1.0, 0.0, 0.0));
        input.run_complete();
        let json = serde_json::to_string(&input).unwrap();
        assert!(!json.contains("is_first_application"));
        let back: InputSample = serde_json::from_str(&json).unwrap();
        assert!(back.is_first_application);
        assert_eq!(back.sequence_number, 7);
    }

    #[test]
    fn repeated_input_keeps_sequence() {
        let mut input = InputSample::new(3, 16).with_jump();
        input.run_complete();
        let again = input.repeated(120);
        assert_eq!(again.sequence_number, 3);
        assert_eq!(again.delta_ms, 120);
        assert!(again.is_first_application);
        assert!(again.jump_requested);
    }
}
