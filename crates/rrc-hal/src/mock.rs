//! In-memory collaborator doubles for engine tests.
//!
//! `MockDriver` records every call so tests can assert on the exact frames
//! the engine transmitted; confirmations/indications are injected by the test
//! through the engine's own event entry point, mirroring how the real driver
//! thread delivers them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::driver::{DriverError, DriverProperty, HardwareDriver};
use crate::voice::{SessionDecision, VoiceSessionService};

/// One frame captured by [`MockDriver::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub controller_id: u8,
    pub profile: u8,
    pub data: Vec<u8>,
    pub tx_window_ms: u32,
}

/// One attribute export captured by [`MockDriver::export_attribute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedAttribute {
    pub controller_id: u8,
    pub identifier: u8,
    pub index: u8,
    pub data: Vec<u8>,
}

/// Recording radio driver.
#[derive(Default)]
pub struct MockDriver {
    pub sent: Mutex<Vec<SentFrame>>,
    pub exports: Mutex<Vec<ExportedAttribute>>,
    pub paired: Mutex<Vec<u64>>,
    pub unpaired: Mutex<Vec<u8>>,
    properties: Mutex<HashMap<DriverProperty, Vec<u8>>>,
    fail_send: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a hardware property value.
    pub fn set_property(&self, property: DriverProperty, value: Vec<u8>) {
        self.properties.lock().expect("mock lock").insert(property, value);
    }

    /// Make subsequent `send` calls fail with a TX error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().expect("mock lock").clone()
    }

    pub fn exported(&self) -> Vec<ExportedAttribute> {
        self.exports.lock().expect("mock lock").clone()
    }

    pub fn property(&self, property: DriverProperty) -> Option<Vec<u8>> {
        self.properties.lock().expect("mock lock").get(&property).cloned()
    }
}

#[async_trait]
impl HardwareDriver for MockDriver {
    async fn pair(&self, ieee_address: u64) -> Result<(), DriverError> {
        self.paired.lock().expect("mock lock").push(ieee_address);
        Ok(())
    }

    async fn unpair(&self, controller_id: u8) -> Result<(), DriverError> {
        self.unpaired.lock().expect("mock lock").push(controller_id);
        Ok(())
    }

    async fn send(
        &self,
        controller_id: u8,
        profile: u8,
        data: &[u8],
        tx_window_ms: u32,
    ) -> Result<(), DriverError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(DriverError::TxFailed("mock send failure".into()));
        }
        self.sent.lock().expect("mock lock").push(SentFrame {
            controller_id,
            profile,
            data: data.to_vec(),
            tx_window_ms,
        });
        Ok(())
    }

    async fn property_get(&self, property: DriverProperty) -> Result<Vec<u8>, DriverError> {
        self.properties
            .lock()
            .expect("mock lock")
            .get(&property)
            .cloned()
            .ok_or(DriverError::UnsupportedProperty(property))
    }

    async fn property_set(
        &self,
        property: DriverProperty,
        value: &[u8],
    ) -> Result<(), DriverError> {
        self.properties
            .lock()
            .expect("mock lock")
            .insert(property, value.to_vec());
        Ok(())
    }

    async fn export_attribute(
        &self,
        controller_id: u8,
        identifier: u8,
        index: u8,
        data: &[u8],
    ) -> Result<(), DriverError> {
        self.exports.lock().expect("mock lock").push(ExportedAttribute {
            controller_id,
            identifier,
            index,
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// Scriptable voice pipeline double.
pub struct MockVoice {
    accept: AtomicBool,
    streaming: Mutex<Vec<u8>>,
    pub terminated: Mutex<Vec<u8>>,
}

impl Default for MockVoice {
    fn default() -> Self {
        MockVoice {
            accept: AtomicBool::new(true),
            streaming: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }
}

impl MockVoice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn set_streaming(&self, controller_id: u8, streaming: bool) {
        let mut s = self.streaming.lock().expect("mock lock");
        if streaming {
            if !s.contains(&controller_id) {
                s.push(controller_id);
            }
        } else {
            s.retain(|c| *c != controller_id);
        }
    }
}

#[async_trait]
impl VoiceSessionService for MockVoice {
    async fn request(&self, _controller_id: u8, _audio_format: u8) -> SessionDecision {
        if self.accept.load(Ordering::SeqCst) {
            SessionDecision::Accept
        } else {
            SessionDecision::Deny { reason: "scripted denial".into() }
        }
    }

    async fn is_streaming(&self, controller_id: u8) -> bool {
        self.streaming.lock().expect("mock lock").contains(&controller_id)
    }

    async fn terminate(&self, controller_id: u8) {
        self.terminated.lock().expect("mock lock").push(controller_id);
        self.set_streaming(controller_id, false);
    }
}
