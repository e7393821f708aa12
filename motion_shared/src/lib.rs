//! `motion_shared`
//!
//! Movement core shared by client and server.
//!
//! Design goals:
//! - Deterministic stepping: same state, input and world give the same bits.
//! - Clear separation of concerns (state, physics, history, interp, net).
//! - Traits for the host-provided capabilities (collider, block queries,
//!   relevance, transforms, events).
//! - No `unsafe`.

pub mod config;
pub mod ecs;
pub mod error;
pub mod event;
pub mod history;
pub mod interp;
pub mod math;
pub mod net;
pub mod physics;
pub mod state;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::error::*;
    pub use crate::event::*;
    pub use crate::history::StateHistory;
    pub use crate::interp::{sample, Sample};
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::physics::{
        step, step_in, BlockQuery, Collider, MovementEnvironment, PhysicsConfig, StepOutcome, SweepResult,
        WorldRelevance,
    };
    pub use crate::state::*;
}
