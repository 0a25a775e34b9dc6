//! Wire codecs for the RRC remote-control link.
//!
//! Everything a remote and a target exchange over the constrained radio link
//! is a fixed-width byte layout. This crate implements:
//! - Heartbeat request/response frames
//! - RIB attribute get/set frames
//! - ASB key-derivation method bitmask negotiation
//! - Typed codecs for structured RIB attribute values
//!
//! Every codec is an explicit encode/decode pair with a declared length, so
//! round-trip behavior is testable and no caller ever hand-packs bytes.

#![forbid(unsafe_code)]

pub mod frames;
pub mod attrs;
pub mod asb;

#[cfg(test)]
mod proptests;

use thiserror::Error;

/// Errors from wire encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("frame truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    #[error("unknown polling action kind: {0:#04x}")]
    UnknownActionKind(u8),

    #[error("unknown key-derivation method: {0:#04x}")]
    UnknownDerivationMethod(u8),

    #[error("payload too long: max {max} bytes, got {got}")]
    PayloadTooLong { max: usize, got: usize },
}
