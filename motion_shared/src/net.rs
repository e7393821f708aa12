//! Networking primitives.
//!
//! Message types exchanged between predictor and authority, plus the byte
//! codec used to put them on a link. Serialization is JSON, kept explicit so
//! the wire format can be versioned.

use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    ecs::EntityId,
    math::Vec3,
    state::{InputSample, MovementMode, PhysicalState},
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u32);

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    /// Client -> server: one input sample for the client's own character.
    Input { entity: EntityId, sample: InputSample },
    /// Server -> clients: an authoritative state.
    State { entity: EntityId, state: PhysicalState },
    /// Server-side administrative change, forwarded for logging and tooling.
    SetMovementMode { entity: EntityId, mode: MovementMode },
    Teleport { entity: EntityId, position: Vec3 },
}

impl NetMsg {
    pub fn entity(&self) -> EntityId {
        match self {
            NetMsg::Input { entity, .. }
            | NetMsg::State { entity, .. }
            | NetMsg::SetMovementMode { entity, .. }
            | NetMsg::Teleport { entity, .. } => *entity,
        }
    }
}

pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}
