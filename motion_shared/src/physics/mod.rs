//! Physics abstraction.
//!
//! The movement core never touches geometry directly. It talks to three
//! capabilities supplied by the host:
//! - [`Collider`]: sweeps a character-shaped volume through the world.
//! - [`BlockQuery`]: per-block liquid/climbable lookups.
//! - [`WorldRelevance`]: whether a region is loaded.
//!
//! [`MovementEnvironment`] bundles them with a collider factory so callers can
//! pass one value around.

mod mover;
pub mod voxel;

use serde::{Deserialize, Serialize};

use crate::{
    config::CharacterConfig,
    math::{Vec3, Vec3i},
};

pub use mover::{step, step_in, StepOutcome};

/// Global physics parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Downward acceleration, units/s².
    pub gravity: f32,
    /// Fastest allowed fall speed.
    pub terminal_velocity: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: 28.0,
            terminal_velocity: 64.0,
        }
    }
}

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepResult {
    pub from: Vec3,
    pub to: Vec3,
    pub has_hit: bool,
    /// Fraction of `from -> to` travelled before contact; 1.0 on a miss.
    pub fraction: f32,
    /// Surface normal at the contact point.
    pub normal: Vec3,
}

impl SweepResult {
    pub fn miss(from: Vec3, to: Vec3) -> Self {
        Self {
            from,
            to,
            has_hit: false,
            fraction: 1.0,
            normal: Vec3::ZERO,
        }
    }

    /// Centre of the swept volume at the moment of contact.
    pub fn contact_position(&self) -> Vec3 {
        self.from.lerp(self.to, self.fraction)
    }
}

/// Character-shaped collision volume.
pub trait Collider {
    /// Sweeps the volume from `from` to `to`. Overlaps shallower than
    /// `penetration` are tolerated.
    fn sweep(&self, from: Vec3, to: Vec3, penetration: f32, slope_limit: f32) -> SweepResult;

    /// Whether the obstacle behind `hit` can be stepped onto.
    fn check_for_step(
        &self,
        hit: &SweepResult,
        direction: Vec3,
        step_height: f32,
        slope_limit: f32,
        probe_distance: f32,
    ) -> bool;

    /// Slope of the surface around the hit, averaged over nearby contacts.
    fn average_slope(&self, _hit: &SweepResult, original_slope: f32, _probe_distance: f32) -> f32 {
        original_slope
    }

    /// Smallest distance the engine treats as non-zero.
    fn epsilon(&self) -> f32;
}

/// Block-level lookups at world positions.
pub trait BlockQuery {
    fn is_liquid(&self, position: Vec3) -> bool;

    fn is_climbable(&self, position: Vec3) -> bool;

    /// Facing of the climbable block at `position`.
    fn climb_direction(&self, position: Vec3) -> Vec3i;
}

pub trait WorldRelevance {
    fn is_position_loaded(&self, position: Vec3) -> bool;
}

/// Everything a step needs from the world.
pub trait MovementEnvironment: BlockQuery + WorldRelevance {
    type Collider<'a>: Collider
    where
        Self: 'a;

    fn character_collider(&self, character: &CharacterConfig) -> Self::Collider<'_>;
}
