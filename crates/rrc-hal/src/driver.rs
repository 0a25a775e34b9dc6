//! Radio driver interface.
//!
//! The vendor chip driver runs its callbacks on its own thread. Implementations
//! of [`HardwareDriver`] must never call back into engine state: confirmations
//! and indications are delivered as immutable [`DriverEvent`] values on the
//! channel handed to the driver at construction, and the engine's worker is
//! the only consumer.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the radio driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("no pairing slot available")]
    NoPairingSlot,

    #[error("controller {0} is not paired")]
    NotPaired(u8),

    #[error("transmission failed: {0}")]
    TxFailed(String),

    #[error("property {0:?} not supported")]
    UnsupportedProperty(DriverProperty),

    #[error("driver not ready")]
    NotReady,
}

/// Result status carried by pair/data confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStatus {
    Success,
    Timeout,
    SecurityFailure,
    NoResponse,
}

impl ConfirmStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ConfirmStatus::Success)
    }
}

/// Hardware property keys reachable through `property_get`/`property_set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverProperty {
    /// Current link key for one pairing slot (16 bytes).
    LinkKey(u8),
    /// ASB key-derivation methods supported by the platform (1-byte mask).
    AsbMethods,
    /// IEEE address of the target radio (8 bytes, big-endian).
    LocalIeeeAddress,
    /// Short (network) address of one pairing slot (2 bytes).
    ShortAddress(u8),
}

/// Events emitted by the driver thread.
///
/// Values are immutable snapshots; the receiving worker owns all mutable
/// state. `ieee_address` is the 64-bit hardware identity, big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// A remote answered discovery and wants to pair.
    DiscoveryIndication {
        ieee_address: u64,
        /// Vendor device-type byte from the discovery payload.
        device_type: u8,
    },
    /// Outcome of a pair request.
    PairConfirmation {
        controller_id: u8,
        ieee_address: u64,
        status: ConfirmStatus,
    },
    /// The remote (or the driver) tore the pairing down.
    UnpairIndication { controller_id: u8 },
    /// Outcome of a `send`.
    DataConfirmation { controller_id: u8, status: ConfirmStatus },
    /// Inbound protocol frame from a paired remote.
    DataIndication {
        controller_id: u8,
        profile: u8,
        /// Raw frame bytes, frame-type byte first.
        data: Vec<u8>,
        /// Driver timestamp of frame reception, milliseconds since boot.
        rx_time_ms: u64,
    },
}

/// Radio driver consumed by the engine.
///
/// `send` is fire-and-forget at this boundary: delivery outcome arrives later
/// as a [`DriverEvent::DataConfirmation`].
#[async_trait]
pub trait HardwareDriver: Send + Sync {
    /// Accept the pending pair request for a discovered remote.
    async fn pair(&self, ieee_address: u64) -> Result<(), DriverError>;

    /// Tear down the pairing for one controller slot.
    async fn unpair(&self, controller_id: u8) -> Result<(), DriverError>;

    /// Queue a frame for transmission to a paired remote.
    ///
    /// `tx_window_ms` bounds how long the driver may hold the frame before
    /// giving up (used for the heartbeat response window).
    async fn send(
        &self,
        controller_id: u8,
        profile: u8,
        data: &[u8],
        tx_window_ms: u32,
    ) -> Result<(), DriverError>;

    /// Read a hardware property.
    async fn property_get(&self, property: DriverProperty) -> Result<Vec<u8>, DriverError>;

    /// Write a hardware property (link-key installation goes through here).
    async fn property_set(&self, property: DriverProperty, value: &[u8])
        -> Result<(), DriverError>;

    /// Export one RIB attribute value to the remote-side NVM mirror.
    async fn export_attribute(
        &self,
        controller_id: u8,
        identifier: u8,
        index: u8,
        data: &[u8],
    ) -> Result<(), DriverError>;
}
