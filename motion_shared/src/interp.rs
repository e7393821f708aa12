//! Interpolation.
//!
//! The server sends discrete states at replication boundaries. Viewers render
//! at their own rate, a fixed delay behind, and sample each character's
//! history at that render time.

use crate::{history::StateHistory, state::PhysicalState};

/// Result of sampling a history at a render time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Blended between the two states bracketing the render time.
    Interpolated(PhysicalState),
    /// Projected forward from the newest state older than the render time.
    Extrapolated(PhysicalState),
}

impl Sample {
    pub fn state(&self) -> &PhysicalState {
        match self {
            Sample::Interpolated(s) | Sample::Extrapolated(s) => s,
        }
    }
}

/// Samples `history` at `render_time`.
///
/// Returns `None` if every buffered state is newer than `render_time`.
pub fn sample(history: &StateHistory, render_time: i64) -> Option<Sample> {
    let mut previous = None;
    let mut next = None;
    for state in history.iter() {
        if state.timestamp <= render_time {
            previous = Some(state);
        } else {
            next = Some(state);
            break;
        }
    }

    match (previous, next) {
        (Some(prev), Some(next)) => Some(Sample::Interpolated(interpolate(prev, next, render_time))),
        (Some(prev), None) => Some(Sample::Extrapolated(extrapolate(prev, render_time))),
        _ => None,
    }
}

/// Blends two states. Mode, velocity and grounding come from `previous`.
pub fn interpolate(previous: &PhysicalState, next: &PhysicalState, render_time: i64) -> PhysicalState {
    let span = (next.timestamp - previous.timestamp) as f32;
    let t = if span > 0.0 {
        ((render_time - previous.timestamp) as f32 / span).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // The accumulator wraps at 1.0; a smaller `next` value means it wrapped
    // during the interval.
    let mut next_footstep = next.footstep_accumulator;
    if next_footstep < previous.footstep_accumulator {
        next_footstep += 1.0;
    }
    let mut footstep = previous.footstep_accumulator * (1.0 - t) + next_footstep * t;
    if footstep >= 1.0 {
        footstep -= 1.0;
    }

    PhysicalState {
        timestamp: render_time,
        position: previous.position.lerp(next.position, t),
        rotation: previous.rotation.slerp(next.rotation, t),
        footstep_accumulator: footstep,
        ..*previous
    }
}

/// Projects a state forward along its velocity.
pub fn extrapolate(previous: &PhysicalState, render_time: i64) -> PhysicalState {
    let elapsed = (render_time - previous.timestamp) as f32 / 1000.0;
    PhysicalState {
        timestamp: render_time,
        position: previous.position + previous.velocity * elapsed,
        ..*previous
    }
}
