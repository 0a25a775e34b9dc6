//! Error types for the RRC engine.
//!
//! Protocol violations are rejected locally and acknowledged as failures on
//! the wire; they surface here only for logging. `CoreError` is what the
//! engine's public entry points return to IPC callers.

use thiserror::Error;

use crate::types::ControllerId;

/// Engine-level errors returned to callers.
///
/// Wire, driver, and storage failures never surface here: the worker handles
/// them in place (failure ack, requeue, or log) per the protocol rules.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown controller: {0}")]
    UnknownController(ControllerId),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("key negotiation already outstanding for {0}")]
    AsbOutstanding(ControllerId),

    #[error("no common key-derivation method")]
    AsbNoMethod,
}
