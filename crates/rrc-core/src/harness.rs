//! Test harness for the control-plane engine.
//!
//! Spawns a full network worker against the in-memory collaborator doubles
//! from `rrc-hal` and provides helpers that drive a remote through the
//! discovery/pairing/validation flow the way the real driver would.

use std::sync::Arc;

use crate::network::{Collaborators, Network, NetworkConfig, NetworkHandle, PROFILE_REMOTE};
use crate::types::{BindingType, ControllerId, IeeeAddress, ValidationState, ValidationType};
use rrc_hal::crypto::HmacKeyDerivation;
use rrc_hal::db::MemoryDatabase;
use rrc_hal::driver::{ConfirmStatus, DriverEvent};
use rrc_hal::mock::{MockDriver, MockVoice};
use rrc_wire::frames::HeartbeatFrame;

/// A spawned worker plus handles to its collaborator doubles.
pub struct TestNetwork {
    pub handle: NetworkHandle,
    pub driver: Arc<MockDriver>,
    pub voice: Arc<MockVoice>,
    pub db: Arc<MemoryDatabase>,
}

/// Spawn a worker with the given config against fresh mocks.
pub async fn spawn_network(config: NetworkConfig) -> TestNetwork {
    let driver = Arc::new(MockDriver::new());
    let voice = Arc::new(MockVoice::new());
    let db = Arc::new(MemoryDatabase::new());
    let handle = Network::spawn(
        config,
        Collaborators {
            driver: driver.clone(),
            crypto: Arc::new(HmacKeyDerivation),
            db: db.clone(),
            voice: voice.clone(),
        },
    )
    .await
    .expect("spawn network worker");
    TestNetwork { handle, driver, voice, db }
}

pub async fn spawn_default() -> TestNetwork {
    spawn_network(NetworkConfig::default()).await
}

/// Drive discovery and a successful pair confirmation for one remote.
pub async fn pair_remote(net: &TestNetwork, id: ControllerId, ieee: IeeeAddress, device_type: u8) {
    net.handle
        .driver_event(DriverEvent::DiscoveryIndication {
            ieee_address: ieee.raw(),
            device_type,
        })
        .await;
    net.handle
        .driver_event(DriverEvent::PairConfirmation {
            controller_id: id.0,
            ieee_address: ieee.raw(),
            status: ConfirmStatus::Success,
        })
        .await;
}

/// Pair and validate a remote end to end. The mock remote advertises no key
/// derivation methods, so validation completes with the current link key.
pub async fn bind_remote(net: &TestNetwork, id: ControllerId, ieee: IeeeAddress, device_type: u8) {
    pair_remote(net, id, ieee, device_type).await;
    net.handle
        .validate(
            id,
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            None,
            None,
        )
        .await
        .expect("validate remote");
}

/// Raw heartbeat frame bytes with the given trigger bits.
pub fn heartbeat_frame(trigger: u8) -> Vec<u8> {
    HeartbeatFrame { trigger }.encode().to_vec()
}

/// Inject an inbound heartbeat the way the driver thread would.
pub async fn heartbeat_in(net: &TestNetwork, id: ControllerId, trigger: u8, rx_time_ms: u64) {
    net.handle
        .driver_event(DriverEvent::DataIndication {
            controller_id: id.0,
            profile: PROFILE_REMOTE,
            data: heartbeat_frame(trigger),
            rx_time_ms,
        })
        .await;
}
