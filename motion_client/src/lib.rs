//! `motion_client`
//!
//! Client-side systems:
//! - Input sampling into sequenced `InputSample`s
//! - Prediction and reconciliation of the local character
//! - Interpolation of remote character states

pub mod input;
pub mod interp;
pub mod predictor;

pub use interp::RemoteInterpolator;
pub use predictor::{ClientPredictor, PredictorState};
