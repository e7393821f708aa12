//! Error types for the movement core.
//!
//! Every variant is local to a single character; none of them is fatal for
//! the update loop. Callers log and move on.

use thiserror::Error;

use crate::ecs::EntityId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MovementError {
    /// A history was read before the initial state was captured.
    #[error("state history is empty")]
    EmptyHistory,

    /// A state would move a history backwards in time or sequence.
    #[error("state out of order: last (t={last_time}, seq={last_seq}), got (t={time}, seq={seq})")]
    OutOfOrder {
        last_time: i64,
        last_seq: u32,
        time: i64,
        seq: u32,
    },

    #[error("unknown character {0:?}")]
    UnknownCharacter(EntityId),

    /// Input arrived before the character's physics collider exists.
    #[error("collider for {0:?} is not ready")]
    ColliderPending(EntityId),

    /// Input claims more simulated time than the authority allows.
    #[error("input for {entity:?} ends at {claimed} ms, limit is {limit} ms")]
    InputOverflow {
        entity: EntityId,
        claimed: i64,
        limit: i64,
    },

    #[error("predictor is not active")]
    NotPredicting,
}

pub type MovementResult<T> = Result<T, MovementError>;
