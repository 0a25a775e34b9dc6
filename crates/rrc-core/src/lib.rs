//! RRC Core - Control-plane engine for RF4CE remote controls.
//!
//! This crate implements:
//! - Per-remote controller state machines (discovery through unbind)
//! - The RIB attribute registry with capability-composed attributes
//! - The heartbeat polling engine and per-remote action queues
//! - The pairing blackout governor
//! - ASB link-key negotiation sessions
//! - The single-writer network worker tying it all together

#![forbid(unsafe_code)]

// Core state machines
pub mod blackout;
pub mod controller;
pub mod rib;

// Services
pub mod asb;
pub mod network;
pub mod polling;

// Supporting modules
pub mod errors;
pub mod events;
pub mod harness;
pub mod types;

pub use errors::CoreError;
pub use events::NetworkEvent;
pub use network::{Collaborators, Network, NetworkConfig, NetworkHandle};
pub use types::{ControllerId, ControllerType, IeeeAddress, NetworkId};
