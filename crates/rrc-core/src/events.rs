//! Events the engine exposes to the rest of the system.
//!
//! Delivered on a `tokio::sync::broadcast` channel; slow subscribers lose
//! events rather than back-pressuring the worker. Events carry identities and
//! reasons only, never key material.

use crate::types::{ControllerId, IeeeAddress, UnbindReason};

/// Why a pairing attempt failed (feeds telemetry and the blackout governor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingFailureReason {
    /// The driver reported the pair exchange failed.
    DriverConfirm,
    /// Discovery arrived while the network was in blackout.
    Blackout,
    /// The ASB key handshake timed out.
    AsbTimeout,
}

impl std::fmt::Display for PairingFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingFailureReason::DriverConfirm => write!(f, "driver_confirm"),
            PairingFailureReason::Blackout => write!(f, "blackout"),
            PairingFailureReason::AsbTimeout => write!(f, "asb_timeout"),
        }
    }
}

/// Lifecycle and synchronization events emitted by a network worker.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A controller completed validation and was persisted.
    Bound {
        controller_id: ControllerId,
        ieee_address: IeeeAddress,
    },
    /// A controller was removed.
    Unbound {
        controller_id: ControllerId,
        ieee_address: IeeeAddress,
        reason: UnbindReason,
    },
    /// A RIB attribute value actually changed.
    RibUpdated { identifier: u8, index: u8 },
    /// A pairing attempt failed.
    PairingFailure {
        ieee_address: IeeeAddress,
        reason: PairingFailureReason,
    },
}
