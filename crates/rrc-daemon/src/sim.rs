//! Simulated radio driver for development and bench bring-up.
//!
//! Stands in for the vendor chip driver on hosts without the radio. Pair and
//! send requests succeed after a short delay, with confirmations delivered
//! through the same event channel the real driver thread uses, so the engine
//! sees the exact callback shape it sees in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use rrc_hal::crypto::LINK_KEY_LEN;
use rrc_hal::driver::{
    ConfirmStatus, DriverError, DriverEvent, DriverProperty, HardwareDriver,
};
use rrc_hal::voice::{SessionDecision, VoiceSessionService};

const CONFIRM_DELAY: Duration = Duration::from_millis(20);

/// Loopback driver delivering confirmations on `events`.
pub struct SimDriver {
    events: mpsc::Sender<DriverEvent>,
    properties: Mutex<HashMap<DriverProperty, Vec<u8>>>,
    next_slot: AtomicU8,
}

impl SimDriver {
    pub fn new(events: mpsc::Sender<DriverEvent>) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            DriverProperty::LocalIeeeAddress,
            0x00124B00_0000FEEDu64.to_be_bytes().to_vec(),
        );
        properties.insert(DriverProperty::AsbMethods, vec![0x01]);
        SimDriver { events, properties: Mutex::new(properties), next_slot: AtomicU8::new(1) }
    }

    /// Inject a discovery indication, as if a remote pressed its setup keys.
    pub async fn discover(&self, ieee_address: u64, device_type: u8) {
        let _ = self
            .events
            .send(DriverEvent::DiscoveryIndication { ieee_address, device_type })
            .await;
    }

    /// Inject an inbound frame from a simulated remote.
    pub async fn inject_frame(&self, controller_id: u8, profile: u8, data: Vec<u8>, rx_time_ms: u64) {
        let _ = self
            .events
            .send(DriverEvent::DataIndication { controller_id, profile, data, rx_time_ms })
            .await;
    }
}

#[async_trait]
impl HardwareDriver for SimDriver {
    async fn pair(&self, ieee_address: u64) -> Result<(), DriverError> {
        let controller_id = self.next_slot.fetch_add(1, Ordering::SeqCst);
        debug!(ieee = format_args!("{:016x}", ieee_address), controller_id, "sim pair");
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CONFIRM_DELAY).await;
            let _ = events
                .send(DriverEvent::PairConfirmation {
                    controller_id,
                    ieee_address,
                    status: ConfirmStatus::Success,
                })
                .await;
        });
        Ok(())
    }

    async fn unpair(&self, controller_id: u8) -> Result<(), DriverError> {
        debug!(controller_id, "sim unpair");
        Ok(())
    }

    async fn send(
        &self,
        controller_id: u8,
        profile: u8,
        data: &[u8],
        _tx_window_ms: u32,
    ) -> Result<(), DriverError> {
        debug!(controller_id, profile, frame = %hex::encode(data), "sim tx");
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CONFIRM_DELAY).await;
            let _ = events
                .send(DriverEvent::DataConfirmation {
                    controller_id,
                    status: ConfirmStatus::Success,
                })
                .await;
        });
        Ok(())
    }

    async fn property_get(&self, property: DriverProperty) -> Result<Vec<u8>, DriverError> {
        if let Some(value) = self.properties.lock().expect("sim lock").get(&property) {
            return Ok(value.clone());
        }
        // Fresh pairing slots start with an all-zero link key.
        if let DriverProperty::LinkKey(_) = property {
            return Ok(vec![0u8; LINK_KEY_LEN]);
        }
        Err(DriverError::UnsupportedProperty(property))
    }

    async fn property_set(
        &self,
        property: DriverProperty,
        value: &[u8],
    ) -> Result<(), DriverError> {
        self.properties.lock().expect("sim lock").insert(property, value.to_vec());
        Ok(())
    }

    async fn export_attribute(
        &self,
        controller_id: u8,
        identifier: u8,
        index: u8,
        _data: &[u8],
    ) -> Result<(), DriverError> {
        debug!(
            controller_id,
            identifier = format_args!("{:#04x}", identifier),
            index,
            "sim attribute export"
        );
        Ok(())
    }
}

/// Voice service for hosts without an audio pipeline: refuses sessions and
/// never streams, which also makes every voice-session heartbeat trigger a
/// stale one.
pub struct NullVoice;

#[async_trait]
impl VoiceSessionService for NullVoice {
    async fn request(&self, _controller_id: u8, _audio_format: u8) -> SessionDecision {
        SessionDecision::Deny { reason: "no voice pipeline configured".to_string() }
    }

    async fn is_streaming(&self, _controller_id: u8) -> bool {
        false
    }

    async fn terminate(&self, _controller_id: u8) {}
}
