//! `motion_server`
//!
//! Server-side systems:
//! - Authoritative stepping of client input
//! - Mode and teleport overrides
//! - Periodic replication with input gap filling
//! - Delayed rendering of characters other than the local viewpoint

pub mod authority;

pub use authority::{Replication, ServerAuthority};
