//! Network aggregate and single-writer worker.
//!
//! One worker task owns every controller and all RIB state for one radio
//! network. External entry points (IPC calls, driver indications) post
//! messages onto the worker's serialized inbound queue; callers needing a
//! synchronous result block on a oneshot until the worker replies. Timers
//! never mutate state from their callbacks — a firing timer enqueues a
//! worker message. This is the core invariant: no two execution contexts
//! ever mutate a controller or registry concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::asb::{AsbConfig, AsbNegotiator};
use crate::blackout::{BlackoutGovernor, BlackoutSettings, BlackoutState};
use crate::controller::{Controller, ControllerRecord, ControllerStatus, ValidateOutcome};
use crate::errors::CoreError;
use crate::events::{NetworkEvent, PairingFailureReason};
use crate::polling::{PollingAction, PollingEngine, PollingEngineConfig};
use crate::polling::{metrics_window, MetricsWindow, UptimeCounters};
use crate::rib::{self, RibRegistry, RibScope, RibWriteOutcome};
use crate::types::{
    BindingType, ControllerId, ControllerType, IeeeAddress, NetworkId, UnbindReason,
    ValidationState, ValidationType,
};
use rrc_hal::crypto::{CryptoError, CryptoModule, KeyDerivationInput, LINK_KEY_LEN};
use rrc_hal::db::{table, Database};
use rrc_hal::driver::{ConfirmStatus, DriverEvent, DriverProperty, HardwareDriver};
use rrc_hal::voice::{SessionDecision, VoiceSessionService};
use rrc_wire::attrs::id as attr_id;
use rrc_wire::frames::{
    HeartbeatFrame, PollingActionKind, RibGetRequest, RibGetResponse, RibSetRequest,
    RibSetResponse, FRAME_HEARTBEAT, FRAME_RIB_GET, FRAME_RIB_SET,
};

/// Profile byte used for control-plane frames on this radio.
pub const PROFILE_REMOTE: u8 = 0xC0;

/// Database key for the rolling metrics-window timestamp.
const TIME_METRICS_KEY: &str = "time_metrics";

// XR15-704: a documented XR15 v1 firmware population crashes when it reads
// back an empty IRDB signature after a re-pair. Injecting this synthetic
// signature before the configuration push keeps those remotes alive. Scoped
// to ControllerType::Xr15 exactly; do not generalize.
const XR15_704_IRDB_SIGNATURE: [u8; 16] = [
    0x58, 0x52, 0x31, 0x35, 0x2D, 0x37, 0x30, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01,
];

// ============================================================================
// Configuration and Collaborators
// ============================================================================

/// Configuration for one network worker.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    pub id: NetworkId,
    pub polling: PollingEngineConfig,
    pub blackout: BlackoutSettings,
    pub asb: AsbConfig,
}

/// External collaborators the worker drives.
#[derive(Clone)]
pub struct Collaborators {
    pub driver: Arc<dyn HardwareDriver>,
    pub crypto: Arc<dyn CryptoModule>,
    pub db: Arc<dyn Database>,
    pub voice: Arc<dyn VoiceSessionService>,
}

// ============================================================================
// Messages
// ============================================================================

/// Everything that can enter the worker queue.
enum NetworkMessage {
    Driver(DriverEvent),
    Validate {
        controller_id: ControllerId,
        binding_type: BindingType,
        validation_type: ValidationType,
        result: ValidationState,
        time_binding: Option<u64>,
        time_last_key: Option<u64>,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Unbind {
        controller_id: ControllerId,
        reason: UnbindReason,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    RibRead {
        controller_id: ControllerId,
        identifier: u8,
        index: u8,
        reply: oneshot::Sender<Result<Vec<u8>, CoreError>>,
    },
    RibWrite {
        controller_id: ControllerId,
        identifier: u8,
        index: u8,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<usize, CoreError>>,
    },
    EnqueueAction {
        controller_id: ControllerId,
        action: PollingAction,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    BeginVoiceSession {
        controller_id: ControllerId,
        audio_format: u8,
        reply: oneshot::Sender<Result<SessionDecision, CoreError>>,
    },
    Status {
        reply: oneshot::Sender<Vec<ControllerStatus>>,
    },
    BlackoutStatus {
        reply: oneshot::Sender<BlackoutState>,
    },
    ApplyBlackoutPolicy {
        settings: BlackoutSettings,
    },
    // Timer-originated messages. Timers never touch state directly.
    SendHeartbeatResponse {
        controller_id: ControllerId,
        frame: Vec<u8>,
        /// When the heartbeat arrived, on the worker's clock.
        arrival: tokio::time::Instant,
    },
    BlackoutTimerExpired {
        generation: u64,
    },
    AsbTimeout {
        controller_id: ControllerId,
        generation: u64,
    },
    AsbDerived {
        controller_id: ControllerId,
        generation: u64,
        result: Result<[u8; LINK_KEY_LEN], CryptoError>,
        elapsed: Duration,
    },
    MetricsTimer,
    Shutdown,
}

// ============================================================================
// Handle
// ============================================================================

/// Caller-side handle to a network worker.
///
/// Every method posts a message and, where a result is expected, blocks on a
/// rendezvous until the worker replies. A closed worker queue means a lost
/// state transition, which is unrecoverable by design — the process aborts
/// rather than continuing with a desynchronized state machine.
#[derive(Clone)]
pub struct NetworkHandle {
    tx: mpsc::Sender<NetworkMessage>,
    events: broadcast::Sender<NetworkEvent>,
}

impl NetworkHandle {
    async fn post(&self, msg: NetworkMessage) {
        self.tx
            .send(msg)
            .await
            .expect("network worker queue closed: lost state transition");
    }

    async fn rendezvous<T>(&self, msg: NetworkMessage, rx: oneshot::Receiver<T>) -> T {
        self.post(msg).await;
        rx.await.expect("network worker dropped reply")
    }

    /// Subscribe to lifecycle and synchronization events.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Marshal a driver event into the worker. The real driver glue calls
    /// this from the driver thread through a small runtime handle; tests
    /// call it directly.
    pub async fn driver_event(&self, event: DriverEvent) {
        self.post(NetworkMessage::Driver(event)).await;
    }

    /// Apply a validation result for a controller. Blocks until the worker
    /// acknowledges — including through an ASB key rotation when one runs.
    pub async fn validate(
        &self,
        controller_id: ControllerId,
        binding_type: BindingType,
        validation_type: ValidationType,
        result: ValidationState,
        time_binding: Option<u64>,
        time_last_key: Option<u64>,
    ) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(
            NetworkMessage::Validate {
                controller_id,
                binding_type,
                validation_type,
                result,
                time_binding,
                time_last_key,
                reply: tx,
            },
            rx,
        )
        .await
    }

    pub async fn unbind(
        &self,
        controller_id: ControllerId,
        reason: UnbindReason,
    ) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(NetworkMessage::Unbind { controller_id, reason, reply: tx }, rx).await
    }

    pub async fn rib_read(
        &self,
        controller_id: ControllerId,
        identifier: u8,
        index: u8,
    ) -> Result<Vec<u8>, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(
            NetworkMessage::RibRead { controller_id, identifier, index, reply: tx },
            rx,
        )
        .await
    }

    /// Write a RIB attribute. Returns achieved length; 0 means rejected.
    pub async fn rib_write(
        &self,
        controller_id: ControllerId,
        identifier: u8,
        index: u8,
        data: Vec<u8>,
    ) -> Result<usize, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(
            NetworkMessage::RibWrite { controller_id, identifier, index, data, reply: tx },
            rx,
        )
        .await
    }

    /// Queue an action for delivery on the controller's next heartbeat.
    pub async fn enqueue_action(
        &self,
        controller_id: ControllerId,
        action: PollingAction,
    ) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(NetworkMessage::EnqueueAction { controller_id, action, reply: tx }, rx)
            .await
    }

    /// Request a voice session; blocks the caller until decided.
    pub async fn begin_voice_session(
        &self,
        controller_id: ControllerId,
        audio_format: u8,
    ) -> Result<SessionDecision, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(
            NetworkMessage::BeginVoiceSession { controller_id, audio_format, reply: tx },
            rx,
        )
        .await
    }

    pub async fn status(&self) -> Vec<ControllerStatus> {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(NetworkMessage::Status { reply: tx }, rx).await
    }

    pub async fn blackout_state(&self) -> BlackoutState {
        let (tx, rx) = oneshot::channel();
        self.rendezvous(NetworkMessage::BlackoutStatus { reply: tx }, rx).await
    }

    /// Push runtime policy settings for the blackout governor.
    pub async fn apply_blackout_policy(&self, settings: BlackoutSettings) {
        self.post(NetworkMessage::ApplyBlackoutPolicy { settings }).await;
    }

    /// Stop the worker. Outstanding timers are destroyed.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(NetworkMessage::Shutdown).await;
    }
}

// ============================================================================
// Pending validation (deferred across an ASB handshake)
// ============================================================================

struct PendingValidate {
    binding_type: BindingType,
    validation_type: ValidationType,
    time_binding: Option<u64>,
    time_last_key: Option<u64>,
    reply: oneshot::Sender<Result<(), CoreError>>,
}

// ============================================================================
// Network Worker
// ============================================================================

/// Worker-owned state for one radio network.
pub struct Network {
    config: NetworkConfig,
    driver: Arc<dyn HardwareDriver>,
    crypto: Arc<dyn CryptoModule>,
    db: Arc<dyn Database>,
    voice: Arc<dyn VoiceSessionService>,

    controllers: HashMap<ControllerId, Controller>,
    network_rib: RibRegistry,
    engine: PollingEngine,
    blackout: BlackoutGovernor,
    asb: AsbNegotiator,

    /// Device types remembered from discovery until pair confirmation.
    pending_discovery: HashMap<u64, ControllerType>,
    /// Validations parked while an ASB handshake runs.
    pending_validation: HashMap<ControllerId, PendingValidate>,

    // Timer handles, destroyed explicitly when superseded.
    blackout_timer: Option<JoinHandle<()>>,
    blackout_generation: u64,
    asb_timers: HashMap<ControllerId, JoinHandle<()>>,
    metrics_timer: Option<JoinHandle<()>>,

    events: broadcast::Sender<NetworkEvent>,
    self_tx: mpsc::Sender<NetworkMessage>,
    local_ieee: IeeeAddress,
}

impl Network {
    /// Load persisted state, arm the metrics timer, and spawn the worker.
    pub async fn spawn(
        config: NetworkConfig,
        collaborators: Collaborators,
    ) -> Result<NetworkHandle, CoreError> {
        let (tx, rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(64);

        let local_ieee = match collaborators
            .driver
            .property_get(DriverProperty::LocalIeeeAddress)
            .await
        {
            Ok(bytes) if bytes.len() == 8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&bytes);
                IeeeAddress::from_be_bytes(b)
            }
            Ok(_) | Err(_) => {
                warn!("driver did not report a local ieee address");
                IeeeAddress::new(0)
            }
        };

        let mut net = Network {
            engine: PollingEngine::new(config.polling.clone()),
            blackout: BlackoutGovernor::new(config.blackout.clone()),
            asb: AsbNegotiator::new(config.asb.clone()),
            config,
            driver: collaborators.driver,
            crypto: collaborators.crypto,
            db: collaborators.db,
            voice: collaborators.voice,
            controllers: HashMap::new(),
            network_rib: RibRegistry::network_wide(),
            pending_discovery: HashMap::new(),
            pending_validation: HashMap::new(),
            blackout_timer: None,
            blackout_generation: 0,
            asb_timers: HashMap::new(),
            metrics_timer: None,
            events: events.clone(),
            self_tx: tx.clone(),
            local_ieee,
        };

        net.load_persisted_state().await;
        net.arm_metrics_timer().await;

        info!(network = %net.config.id, controllers = net.controllers.len(), "network worker starting");
        tokio::spawn(net.run(rx));

        Ok(NetworkHandle { tx, events })
    }

    fn now_unix(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }

    fn emit(&self, event: NetworkEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn run(mut self, mut rx: mpsc::Receiver<NetworkMessage>) {
        while let Some(msg) = rx.recv().await {
            if matches!(msg, NetworkMessage::Shutdown) {
                break;
            }
            self.handle(msg).await;
        }
        // Destroy outstanding timers on the way out.
        if let Some(t) = self.blackout_timer.take() {
            t.abort();
        }
        if let Some(t) = self.metrics_timer.take() {
            t.abort();
        }
        for (_, t) in self.asb_timers.drain() {
            t.abort();
        }
        info!(network = %self.config.id, "network worker stopped");
    }

    async fn handle(&mut self, msg: NetworkMessage) {
        match msg {
            NetworkMessage::Driver(event) => self.handle_driver_event(event).await,
            NetworkMessage::Validate {
                controller_id,
                binding_type,
                validation_type,
                result,
                time_binding,
                time_last_key,
                reply,
            } => {
                self.handle_validate(
                    controller_id,
                    binding_type,
                    validation_type,
                    result,
                    time_binding,
                    time_last_key,
                    reply,
                )
                .await;
            }
            NetworkMessage::Unbind { controller_id, reason, reply } => {
                let res = self.unbind_controller(controller_id, reason, false).await;
                let _ = reply.send(res);
            }
            NetworkMessage::RibRead { controller_id, identifier, index, reply } => {
                let _ = reply.send(self.rib_read(controller_id, identifier, index));
            }
            NetworkMessage::RibWrite { controller_id, identifier, index, data, reply } => {
                let res = self.apply_rib_write(controller_id, identifier, index, &data).await;
                let _ = reply.send(res);
            }
            NetworkMessage::EnqueueAction { controller_id, action, reply } => {
                let res = match self.controllers.get_mut(&controller_id) {
                    Some(ctrl) => {
                        ctrl.actions.push(action);
                        Ok(())
                    }
                    None => Err(CoreError::UnknownController(controller_id)),
                };
                let _ = reply.send(res);
            }
            NetworkMessage::BeginVoiceSession { controller_id, audio_format, reply } => {
                let res = match self.controllers.get(&controller_id) {
                    Some(ctrl) if ctrl.is_validated() => {
                        Ok(self.voice.request(controller_id.0, audio_format).await)
                    }
                    Some(_) => Err(CoreError::InvalidState("controller not validated".into())),
                    None => Err(CoreError::UnknownController(controller_id)),
                };
                let _ = reply.send(res);
            }
            NetworkMessage::Status { reply } => {
                let mut statuses: Vec<_> =
                    self.controllers.values().map(Controller::status).collect();
                statuses.sort_by_key(|s| s.controller_id);
                let _ = reply.send(statuses);
            }
            NetworkMessage::BlackoutStatus { reply } => {
                let _ = reply.send(self.blackout.state());
            }
            NetworkMessage::ApplyBlackoutPolicy { settings } => {
                self.blackout.apply_policy(settings);
            }
            NetworkMessage::SendHeartbeatResponse { controller_id, frame, arrival } => {
                self.send_heartbeat_response(controller_id, frame, arrival).await;
            }
            NetworkMessage::BlackoutTimerExpired { generation } => {
                if generation == self.blackout_generation {
                    self.blackout_timer = None;
                    self.blackout.on_timer_expired();
                }
            }
            NetworkMessage::AsbTimeout { controller_id, generation } => {
                self.handle_asb_timeout(controller_id, generation).await;
            }
            NetworkMessage::AsbDerived { controller_id, generation, result, elapsed } => {
                self.handle_asb_derived(controller_id, generation, result, elapsed).await;
            }
            NetworkMessage::MetricsTimer => {
                self.run_metrics_window().await;
                self.arm_metrics_timer().await;
            }
            NetworkMessage::Shutdown => unreachable!("handled in run loop"),
        }
    }

    // ------------------------------------------------------------------
    // Startup load
    // ------------------------------------------------------------------

    /// Rebuild controllers and RIB mirrors from the database. Export to the
    /// remote NVM is suppressed for the whole load so stale values are never
    /// echoed back.
    async fn load_persisted_state(&mut self) {
        let rib_keys = match self.db.keys(table::RIB).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "failed to enumerate rib rows, starting empty");
                Vec::new()
            }
        };

        self.network_rib.begin_import();
        for key in rib_keys.iter().filter(|k| k.starts_with("net/")) {
            self.load_rib_row_into_network(key).await;
        }
        self.network_rib.end_import();

        let controller_keys = match self.db.keys(table::CONTROLLERS).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "failed to enumerate controllers, starting empty");
                return;
            }
        };

        for key in controller_keys {
            let blob = match self.db.read(table::CONTROLLERS, &key).await {
                Ok(Some(blob)) => blob,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, key, "failed to read controller row");
                    continue;
                }
            };
            let record = match ControllerRecord::decode(&blob) {
                Ok(record) => record,
                Err(e) => {
                    error!(error = %e, key, "corrupt controller row, skipped");
                    continue;
                }
            };
            let id = record.controller_id;
            let ieee = record.ieee_address;
            let mut ctrl = Controller::from_record(record);

            ctrl.rib.begin_import();
            let prefix = ctrl.rib.db_key_prefix();
            for rkey in rib_keys.iter().filter(|k| k.starts_with(&prefix)) {
                if let Some((identifier, index)) = parse_rib_key(rkey) {
                    match self.db.read(table::RIB, rkey).await {
                        Ok(Some(blob)) => ctrl.rib.load_row(identifier, index, &blob),
                        Ok(None) => {}
                        Err(e) => error!(error = %e, key = %rkey, "failed to read rib row"),
                    }
                }
            }
            ctrl.rib.end_import();

            let uptime_key = uptime_db_key(ieee);
            if let Ok(Some(blob)) = self.db.read(table::METRICS, &uptime_key).await {
                if let Some(counters) = UptimeCounters::decode(&blob) {
                    ctrl.uptime = counters;
                }
            }

            debug!(controller = %id, ieee = %ieee, "controller loaded from database");
            self.controllers.insert(id, ctrl);
        }
    }

    async fn load_rib_row_into_network(&mut self, key: &str) {
        if let Some((identifier, index)) = parse_rib_key(key) {
            match self.db.read(table::RIB, key).await {
                Ok(Some(blob)) => self.network_rib.load_row(identifier, index, &blob),
                Ok(None) => {}
                Err(e) => error!(error = %e, key, "failed to read network rib row"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Driver events
    // ------------------------------------------------------------------

    async fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::DiscoveryIndication { ieee_address, device_type } => {
                let ieee = IeeeAddress::new(ieee_address);
                if self.blackout.is_blackout() {
                    warn!(ieee = %ieee, "discovery rejected, network in pairing blackout");
                    self.emit(NetworkEvent::PairingFailure {
                        ieee_address: ieee,
                        reason: PairingFailureReason::Blackout,
                    });
                    return;
                }
                let controller_type = ControllerType::from_device_type(device_type);
                self.pending_discovery.insert(ieee_address, controller_type);
                if let Err(e) = self.driver.pair(ieee_address).await {
                    warn!(ieee = %ieee, error = %e, "pair request failed");
                    self.record_pairing_failure(ieee, PairingFailureReason::DriverConfirm);
                }
            }
            DriverEvent::PairConfirmation { controller_id, ieee_address, status } => {
                self.handle_pair_confirmation(
                    ControllerId(controller_id),
                    IeeeAddress::new(ieee_address),
                    status,
                )
                .await;
            }
            DriverEvent::UnpairIndication { controller_id } => {
                let _ = self
                    .unbind_controller(
                        ControllerId(controller_id),
                        UnbindReason::DriverIndication,
                        true,
                    )
                    .await;
            }
            DriverEvent::DataConfirmation { controller_id, status } => {
                self.handle_data_confirmation(ControllerId(controller_id), status);
            }
            DriverEvent::DataIndication { controller_id, profile, data, rx_time_ms } => {
                if profile != PROFILE_REMOTE {
                    debug!(profile, "ignoring frame for foreign profile");
                    return;
                }
                self.dispatch_frame(ControllerId(controller_id), &data, rx_time_ms).await;
            }
        }
    }

    async fn handle_pair_confirmation(
        &mut self,
        id: ControllerId,
        ieee: IeeeAddress,
        status: ConfirmStatus,
    ) {
        let controller_type = self
            .pending_discovery
            .remove(&ieee.raw())
            .unwrap_or(ControllerType::Unknown);

        if !status.is_success() {
            warn!(controller = %id, ieee = %ieee, ?status, "pair confirmation failed");
            self.record_pairing_failure(ieee, PairingFailureReason::DriverConfirm);
            return;
        }

        // Re-pair of a known remote: keep its state, reset validation.
        if let Some(existing_id) = self.controller_id_by_ieee(ieee) {
            let now_unix = self.now_unix();
            let ctrl = self
                .controllers
                .get_mut(&existing_id)
                .expect("controller index out of sync");
            let record = ctrl.record();
            ctrl.validate(
                record.binding_type,
                record.validation_type,
                ValidationState::Pending,
                None,
                None,
                now_unix,
            );
            info!(controller = %existing_id, ieee = %ieee, "known remote re-paired");

            if ctrl.controller_type() == ControllerType::Xr15 {
                self.apply_xr15_704_quirk(existing_id).await;
            }
            return;
        }

        info!(controller = %id, ieee = %ieee, %controller_type, "remote paired, validation pending");
        let ctrl = Controller::discovered(id, ieee, controller_type, BindingType::Interactive);
        self.controllers.insert(id, ctrl);
    }

    /// Inject the synthetic IRDB signature for the XR15-704 population.
    async fn apply_xr15_704_quirk(&mut self, id: ControllerId) {
        info!(controller = %id, "applying XR15-704 irdb signature workaround");
        let outcome = match self.controllers.get_mut(&id) {
            Some(ctrl) => ctrl.rib.set_local(attr_id::IRDB_STATUS, 0, &XR15_704_IRDB_SIGNATURE),
            None => return,
        };
        self.run_rib_effects(Some(id), attr_id::IRDB_STATUS, 0, &XR15_704_IRDB_SIGNATURE, outcome)
            .await;
    }

    fn handle_data_confirmation(&mut self, id: ControllerId, status: ConfirmStatus) {
        let Some(ctrl) = self.controllers.get_mut(&id) else {
            return;
        };
        match (status.is_success(), ctrl.in_flight.take()) {
            (true, Some(action)) => {
                if action.kind == PollingActionKind::PollingConfiguration {
                    ctrl.mark_configured();
                }
            }
            (false, Some(action)) => {
                warn!(controller = %id, kind = ?action.kind, "action delivery failed, requeued");
                ctrl.actions.push(action);
            }
            (_, None) => {}
        }
    }

    fn controller_id_by_ieee(&self, ieee: IeeeAddress) -> Option<ControllerId> {
        self.controllers
            .iter()
            .find(|(_, c)| c.ieee_address() == ieee)
            .map(|(id, _)| *id)
    }

    fn record_pairing_failure(&mut self, ieee: IeeeAddress, reason: PairingFailureReason) {
        self.emit(NetworkEvent::PairingFailure { ieee_address: ieee, reason });
        if let Some(duration) = self.blackout.record_failure() {
            self.arm_blackout_timer(duration);
        }
    }

    fn arm_blackout_timer(&mut self, duration: Duration) {
        // Supersede any previous timer explicitly.
        if let Some(t) = self.blackout_timer.take() {
            t.abort();
        }
        self.blackout_generation += 1;
        let generation = self.blackout_generation;
        let tx = self.self_tx.clone();
        self.blackout_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // Send failure means the worker is shutting down.
            let _ = tx.send(NetworkMessage::BlackoutTimerExpired { generation }).await;
        }));
    }

    // ------------------------------------------------------------------
    // Frame dispatch
    // ------------------------------------------------------------------

    async fn dispatch_frame(&mut self, id: ControllerId, data: &[u8], rx_time_ms: u64) {
        let Some(&frame_type) = data.first() else {
            warn!(controller = %id, "empty frame dropped");
            return;
        };
        match frame_type {
            FRAME_HEARTBEAT => self.handle_heartbeat_frame(id, data, rx_time_ms).await,
            FRAME_RIB_SET => self.handle_rib_set_frame(id, data).await,
            FRAME_RIB_GET => self.handle_rib_get_frame(id, data).await,
            other => {
                warn!(controller = %id, frame_type = format_args!("{:#04x}", other), "unknown frame dropped");
            }
        }
    }

    async fn handle_heartbeat_frame(&mut self, id: ControllerId, data: &[u8], rx_time_ms: u64) {
        let arrival = tokio::time::Instant::now();
        let frame = match HeartbeatFrame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(controller = %id, error = %e, "malformed heartbeat dropped");
                return;
            }
        };
        if !self.controllers.contains_key(&id) {
            warn!(controller = %id, "heartbeat from unknown controller dropped");
            return;
        }

        let voice_streaming = if frame.trigger & rrc_wire::frames::trigger::VOICE_SESSION != 0 {
            self.voice.is_streaming(id.0).await
        } else {
            false
        };

        let now_unix = self.now_unix();
        let ctrl = self.controllers.get_mut(&id).expect("checked above");
        let reply = self.engine.handle_heartbeat(ctrl, &frame, rx_time_ms, now_unix, voice_streaming);

        if let Some(action) = &reply.delivered {
            ctrl.in_flight = Some(action.clone());
        }
        let flush = if reply.flush_counters {
            Some((ctrl.ieee_address(), ctrl.uptime.encode()))
        } else {
            None
        };

        if reply.terminate_voice {
            info!(controller = %id, "stale voice-session trigger, terminating session");
            self.voice.terminate(id.0).await;
        }
        if let Some((ieee, blob)) = flush {
            match self.db.write(table::METRICS, &uptime_db_key(ieee), &blob).await {
                Ok(()) => {
                    if let Some(ctrl) = self.controllers.get_mut(&id) {
                        ctrl.uptime.mark_flushed();
                    }
                }
                Err(e) => error!(controller = %id, error = %e, "uptime counter flush failed"),
            }
        }

        let response_frame = match reply.response.encode() {
            Ok(frame) => frame.to_vec(),
            Err(e) => {
                error!(controller = %id, error = %e, "heartbeat response encode failed");
                return;
            }
        };

        // The idle delay is anchored to the frame's arrival on the worker's
        // own clock. The driver's rx timestamp shares no epoch with ours and
        // is never used for scheduling, only for gap accounting above.
        let send_at = arrival + Duration::from_millis(self.engine.config().idle_delay_ms);
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(send_at).await;
            let _ = tx
                .send(NetworkMessage::SendHeartbeatResponse {
                    controller_id: id,
                    frame: response_frame,
                    arrival,
                })
                .await;
        });
    }

    async fn send_heartbeat_response(
        &mut self,
        id: ControllerId,
        frame: Vec<u8>,
        arrival: tokio::time::Instant,
    ) {
        let window = Duration::from_millis(self.engine.config().response_window_ms);
        let elapsed = arrival.elapsed();
        if elapsed > window {
            warn!(
                controller = %id,
                late_ms = (elapsed - window).as_millis() as u64,
                "heartbeat response slipped past the response window"
            );
        }
        let tx_window = self.engine.config().tx_window_ms;
        if let Err(e) = self.driver.send(id.0, PROFILE_REMOTE, &frame, tx_window).await {
            warn!(controller = %id, error = %e, "heartbeat response send failed");
            // The delivered action rides the next heartbeat instead.
            if let Some(ctrl) = self.controllers.get_mut(&id) {
                if let Some(action) = ctrl.in_flight.take() {
                    ctrl.actions.push(action);
                }
            }
        }
    }

    async fn handle_rib_set_frame(&mut self, id: ControllerId, data: &[u8]) {
        let request = match RibSetRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                warn!(controller = %id, error = %e, "malformed rib set dropped");
                return;
            }
        };
        let achieved = self
            .apply_rib_write(id, request.identifier, request.index, &request.data)
            .await
            .unwrap_or(0);
        let response = RibSetResponse {
            identifier: request.identifier,
            index: request.index,
            achieved_length: achieved as u8,
        };
        let tx_window = self.engine.config().tx_window_ms;
        if let Err(e) = self.driver.send(id.0, PROFILE_REMOTE, &response.encode(), tx_window).await
        {
            warn!(controller = %id, error = %e, "rib set response send failed");
        }
    }

    async fn handle_rib_get_frame(&mut self, id: ControllerId, data: &[u8]) {
        let request = match RibGetRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                warn!(controller = %id, error = %e, "malformed rib get dropped");
                return;
            }
        };
        let mut buf = vec![0u8; request.length as usize];
        let n = match rib::scope_of(request.identifier) {
            Some(RibScope::NetworkWide) => {
                self.network_rib.read(request.identifier, request.index, &mut buf)
            }
            Some(RibScope::PerController) => match self.controllers.get(&id) {
                Some(ctrl) => ctrl.rib.read(request.identifier, request.index, &mut buf),
                None => 0,
            },
            None => 0,
        };
        buf.truncate(n);
        let response =
            RibGetResponse { identifier: request.identifier, index: request.index, data: buf };
        let tx_window = self.engine.config().tx_window_ms;
        if let Err(e) = self.driver.send(id.0, PROFILE_REMOTE, &response.encode(), tx_window).await
        {
            warn!(controller = %id, error = %e, "rib get response send failed");
        }
    }

    // ------------------------------------------------------------------
    // RIB routing and effects
    // ------------------------------------------------------------------

    fn rib_read(
        &self,
        id: ControllerId,
        identifier: u8,
        index: u8,
    ) -> Result<Vec<u8>, CoreError> {
        match rib::scope_of(identifier) {
            Some(RibScope::NetworkWide) => self
                .network_rib
                .value(identifier, index)
                .map(|v| v.to_vec())
                .ok_or_else(|| CoreError::InvalidState("unknown attribute index".into())),
            Some(RibScope::PerController) => {
                let ctrl = self
                    .controllers
                    .get(&id)
                    .ok_or(CoreError::UnknownController(id))?;
                ctrl.rib
                    .value(identifier, index)
                    .map(|v| v.to_vec())
                    .ok_or_else(|| CoreError::InvalidState("unknown attribute index".into()))
            }
            None => Err(CoreError::InvalidState("unknown attribute".into())),
        }
    }

    /// Route a RIB write by scope and run its effects. Returns achieved
    /// length (0 on rejection).
    async fn apply_rib_write(
        &mut self,
        id: ControllerId,
        identifier: u8,
        index: u8,
        data: &[u8],
    ) -> Result<usize, CoreError> {
        match rib::scope_of(identifier) {
            Some(RibScope::NetworkWide) => {
                let outcome = self.network_rib.write(identifier, index, data);
                let achieved = self.run_rib_effects(None, identifier, index, data, outcome).await;
                Ok(achieved)
            }
            Some(RibScope::PerController) => {
                let Some(ctrl) = self.controllers.get_mut(&id) else {
                    return Err(CoreError::UnknownController(id));
                };
                let outcome = ctrl.rib.write(identifier, index, data);
                let achieved =
                    self.run_rib_effects(Some(id), identifier, index, data, outcome).await;
                Ok(achieved)
            }
            None => {
                warn!(
                    controller = %id,
                    identifier = format_args!("{:#04x}", identifier),
                    "rib write to unknown identifier rejected"
                );
                Ok(0)
            }
        }
    }

    /// Export/persist/broadcast per the write outcome. `owner` is `None`
    /// for the network-wide registry.
    async fn run_rib_effects(
        &mut self,
        owner: Option<ControllerId>,
        identifier: u8,
        index: u8,
        data: &[u8],
        outcome: RibWriteOutcome,
    ) -> usize {
        let RibWriteOutcome::Written { changed, export, persist } = outcome else {
            return 0;
        };

        if let Some((tbl, key)) = persist {
            if let Err(e) = self.db.write(tbl, &key, data).await {
                // In-memory state stays authoritative until the next write.
                error!(key, error = %e, "rib row persist failed");
            }
        }

        if export {
            match owner {
                Some(id) => {
                    if let Err(e) =
                        self.driver.export_attribute(id.0, identifier, index, data).await
                    {
                        warn!(controller = %id, error = %e, "rib export failed");
                    }
                }
                None => {
                    // Network-wide values fan out to every bound remote.
                    let ids: Vec<ControllerId> = self
                        .controllers
                        .values()
                        .filter(|c| c.is_validated())
                        .map(|c| c.id())
                        .collect();
                    for id in ids {
                        if let Err(e) =
                            self.driver.export_attribute(id.0, identifier, index, data).await
                        {
                            warn!(controller = %id, error = %e, "rib fan-out export failed");
                        }
                    }
                }
            }
        }

        if changed && owner.is_none() {
            // Every remote learns on its next check-in that configuration
            // changed.
            for ctrl in self.controllers.values_mut() {
                ctrl.rib_updated = true;
            }
            self.emit(NetworkEvent::RibUpdated { identifier, index });
        }

        data.len()
    }

    // ------------------------------------------------------------------
    // Validation and ASB
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn handle_validate(
        &mut self,
        id: ControllerId,
        binding_type: BindingType,
        validation_type: ValidationType,
        result: ValidationState,
        time_binding: Option<u64>,
        time_last_key: Option<u64>,
        reply: oneshot::Sender<Result<(), CoreError>>,
    ) {
        let Some(ctrl) = self.controllers.get_mut(&id) else {
            let _ = reply.send(Err(CoreError::UnknownController(id)));
            return;
        };

        // A successful validation first rotates the link key (ASB); the
        // validation is acknowledged once the new key is installed, or falls
        // back to the current key on timeout.
        if result == ValidationState::Success && !ctrl.is_validated() {
            if self.pending_validation.contains_key(&id) {
                let _ = reply.send(Err(CoreError::AsbOutstanding(id)));
                return;
            }
            let controller_methods = ctrl
                .rib
                .value(attr_id::CONTROLLER_CAPABILITIES, 0)
                .and_then(|v| v.first().copied())
                .unwrap_or(0);
            let pending = PendingValidate {
                binding_type,
                validation_type,
                time_binding,
                time_last_key,
                reply,
            };
            self.pending_validation.insert(id, pending);

            match self.start_asb(id, controller_methods).await {
                Ok(()) => {}
                Err(CoreError::AsbNoMethod) => {
                    debug!(controller = %id, "no common asb method, validating with current key");
                    self.finish_validation(id, ValidationState::Success).await;
                }
                Err(e) => {
                    warn!(controller = %id, error = %e, "asb start failed, validating with current key");
                    self.finish_validation(id, ValidationState::Success).await;
                }
            }
            return;
        }

        let now_unix = self.now_unix();
        let ctrl = self.controllers.get_mut(&id).expect("checked above");
        let outcome = ctrl.validate(
            binding_type,
            validation_type,
            result,
            time_binding,
            time_last_key,
            now_unix,
        );
        let res = self.apply_validate_outcome(id, outcome).await;
        let _ = reply.send(res);
    }

    /// Run the effects of a completed validate transition.
    async fn apply_validate_outcome(
        &mut self,
        id: ControllerId,
        outcome: ValidateOutcome,
    ) -> Result<(), CoreError> {
        match outcome {
            ValidateOutcome::NewlyValidated => {
                let (ieee, record, snapshot) = {
                    let ctrl = self.controllers.get(&id).expect("validated controller exists");
                    (ctrl.ieee_address(), ctrl.record().encode(), ctrl.rib.snapshot())
                };
                if let Err(e) = self.db.write(table::CONTROLLERS, &ieee.db_key(), &record).await {
                    error!(controller = %id, error = %e, "controller row persist failed");
                }
                for (tbl, key, value) in snapshot {
                    if let Err(e) = self.db.write(tbl, &key, &value).await {
                        error!(controller = %id, key, error = %e, "rib snapshot persist failed");
                    }
                }
                self.blackout.record_success();
                self.emit(NetworkEvent::Bound { controller_id: id, ieee_address: ieee });
                info!(controller = %id, ieee = %ieee, "controller validated and bound");

                // Immediate configuration push rides the next heartbeat.
                let ctrl = self.controllers.get_mut(&id).expect("validated controller exists");
                ctrl.actions.push(PollingAction::new(PollingActionKind::PollingConfiguration));
                Ok(())
            }
            ValidateOutcome::AlreadyValidated => Ok(()),
            ValidateOutcome::RevertedToPending => {
                let (ieee, record, persisted) = {
                    let ctrl = self.controllers.get(&id).expect("controller exists");
                    (ctrl.ieee_address(), ctrl.record().encode(), ctrl.is_persisted())
                };
                if persisted {
                    if let Err(e) =
                        self.db.write(table::CONTROLLERS, &ieee.db_key(), &record).await
                    {
                        error!(controller = %id, error = %e, "controller row persist failed");
                    }
                }
                Ok(())
            }
            ValidateOutcome::Failed => {
                info!(controller = %id, "validation failed, removing controller");
                self.unbind_controller(id, UnbindReason::ValidationFailed, false).await
            }
        }
    }

    async fn start_asb(&mut self, id: ControllerId, controller_methods: u8) -> Result<(), CoreError> {
        let platform_methods = match self.driver.property_get(DriverProperty::AsbMethods).await {
            Ok(bytes) if !bytes.is_empty() => bytes[0],
            _ => self.crypto.supported_methods(),
        };

        let session = self.asb.begin(id, controller_methods, platform_methods)?;
        let generation = session.generation;
        let method = session.method;

        let current_key = match self.driver.property_get(DriverProperty::LinkKey(id.0)).await {
            Ok(bytes) if bytes.len() == LINK_KEY_LEN => {
                let mut key = [0u8; LINK_KEY_LEN];
                key.copy_from_slice(&bytes);
                key
            }
            other => {
                warn!(controller = %id, ok = other.is_ok(), "link key unavailable, asb abandoned");
                self.asb.complete(id, generation);
                return Err(CoreError::AsbNoMethod);
            }
        };

        // Budget timer; destroyed by handle when the handshake completes.
        let budget = self.asb.budget();
        let tx = self.self_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            let _ = tx.send(NetworkMessage::AsbTimeout { controller_id: id, generation }).await;
        });
        if let Some(old) = self.asb_timers.insert(id, timer) {
            old.abort();
        }

        // Derivation runs to completion off the worker; a stale result is
        // recognized by generation and discarded.
        let crypto = self.crypto.clone();
        let input = KeyDerivationInput {
            current_key,
            remote_ieee: self
                .controllers
                .get(&id)
                .map(|c| c.ieee_address().raw())
                .unwrap_or(0),
            local_ieee: self.local_ieee.raw(),
        };
        let tx = self.self_tx.clone();
        let started = Instant::now();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || crypto.derive(&input, method))
                .await
            {
                Ok(result) => result,
                Err(e) => Err(CryptoError::DerivationFailed(format!("derive task: {}", e))),
            };
            let _ = tx
                .send(NetworkMessage::AsbDerived {
                    controller_id: id,
                    generation,
                    result,
                    elapsed: started.elapsed(),
                })
                .await;
        });
        Ok(())
    }

    async fn handle_asb_derived(
        &mut self,
        id: ControllerId,
        generation: u64,
        result: Result<[u8; LINK_KEY_LEN], CryptoError>,
        elapsed: Duration,
    ) {
        let Some(session) = self.asb.complete(id, generation) else {
            debug!(controller = %id, generation, "stale asb derivation result discarded");
            return;
        };
        if let Some(timer) = self.asb_timers.remove(&id) {
            timer.abort();
        }

        info!(
            controller = %id,
            method = ?session.method,
            elapsed_ms = elapsed.as_millis() as u64,
            "asb key derivation finished"
        );
        if elapsed > self.asb.budget() {
            warn!(controller = %id, "asb derivation exceeded budget but key still installs");
        }

        match result {
            Ok(key) => {
                match self
                    .driver
                    .property_set(DriverProperty::LinkKey(id.0), &key)
                    .await
                {
                    Ok(()) => {
                        if let Some(ctrl) = self.controllers.get_mut(&id) {
                            ctrl.set_negotiated_asb_method(session.method as u8);
                        }
                    }
                    Err(e) => {
                        error!(controller = %id, error = %e, "link key install failed, keeping current key");
                    }
                }
            }
            Err(e) => {
                error!(controller = %id, error = %e, "asb derivation failed, keeping current key");
            }
        }
        self.finish_validation(id, ValidationState::Success).await;
    }

    async fn handle_asb_timeout(&mut self, id: ControllerId, generation: u64) {
        let Some(session) = self.asb.on_timeout(id, generation) else {
            return;
        };
        self.asb_timers.remove(&id);
        warn!(
            controller = %id,
            elapsed_ms = session.elapsed().as_millis() as u64,
            fallback_count = self.asb.fallback_count(),
            "asb negotiation timed out, falling back to current key"
        );
        if let Some(ieee) = self.controllers.get(&id).map(|c| c.ieee_address()) {
            self.record_pairing_failure(ieee, PairingFailureReason::AsbTimeout);
        }
        // Fail-safe: the pairing completes with the existing key.
        self.finish_validation(id, ValidationState::Success).await;
    }

    /// Complete a validation parked behind an ASB handshake.
    async fn finish_validation(&mut self, id: ControllerId, result: ValidationState) {
        let Some(pending) = self.pending_validation.remove(&id) else {
            return;
        };
        let now_unix = self.now_unix();
        let Some(ctrl) = self.controllers.get_mut(&id) else {
            let _ = pending.reply.send(Err(CoreError::UnknownController(id)));
            return;
        };
        let outcome = ctrl.validate(
            pending.binding_type,
            pending.validation_type,
            result,
            pending.time_binding,
            pending.time_last_key,
            now_unix,
        );
        let res = self.apply_validate_outcome(id, outcome).await;
        let _ = pending.reply.send(res);
    }

    // ------------------------------------------------------------------
    // Unbind
    // ------------------------------------------------------------------

    /// Remove a controller: driver unpair (unless the driver initiated),
    /// database rows deleted, registry released, event emitted. Guarded so a
    /// double-unbind is a no-op.
    async fn unbind_controller(
        &mut self,
        id: ControllerId,
        reason: UnbindReason,
        from_driver: bool,
    ) -> Result<(), CoreError> {
        let Some(ctrl) = self.controllers.get_mut(&id) else {
            return if from_driver { Ok(()) } else { Err(CoreError::UnknownController(id)) };
        };
        if !ctrl.take_unbind(reason) {
            return Ok(());
        }
        let ieee = ctrl.ieee_address();
        let rib_prefix = ctrl.rib.db_key_prefix();

        if !from_driver {
            if let Err(e) = self.driver.unpair(id.0).await {
                warn!(controller = %id, error = %e, "driver unpair failed");
            }
        }
        if let Err(e) = self.db.delete(table::CONTROLLERS, &ieee.db_key()).await {
            error!(controller = %id, error = %e, "controller row delete failed");
        }
        if let Err(e) = self.db.delete_prefix(table::RIB, &rib_prefix).await {
            error!(controller = %id, error = %e, "rib rows delete failed");
        }
        if let Err(e) = self.db.delete(table::METRICS, &uptime_db_key(ieee)).await {
            error!(controller = %id, error = %e, "uptime counters delete failed");
        }

        // Dropping the controller releases its registry and action queue.
        self.controllers.remove(&id);
        self.asb.cancel(id);
        if let Some(timer) = self.asb_timers.remove(&id) {
            timer.abort();
        }
        if let Some(pending) = self.pending_validation.remove(&id) {
            let _ = pending
                .reply
                .send(Err(CoreError::InvalidState("controller unbound during validation".into())));
        }

        info!(controller = %id, ieee = %ieee, %reason, "controller unbound");
        self.emit(NetworkEvent::Unbound { controller_id: id, ieee_address: ieee, reason });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Metrics window
    // ------------------------------------------------------------------

    /// The rolling window elapsed: voice-capable bound remotes upload their
    /// metrics counters on the next check-in.
    async fn run_metrics_window(&mut self) {
        let mut enqueued = 0usize;
        for ctrl in self.controllers.values_mut() {
            if ctrl.is_validated() && ctrl.controller_type().voice_capable() {
                ctrl.actions.push(PollingAction::new(PollingActionKind::Metrics));
                enqueued += 1;
            }
        }
        debug!(enqueued, "metrics window elapsed, actions queued");
        let now = self.now_unix().to_be_bytes().to_vec();
        if let Err(e) = self.db.write(table::METRICS, TIME_METRICS_KEY, &now).await {
            error!(error = %e, "time_metrics persist failed");
        }
    }

    /// Self-re-arming window timer: the remaining time is recomputed from
    /// the persisted timestamp on every arm, tolerating clock changes.
    async fn arm_metrics_timer(&mut self) {
        let window = self.engine.config().metrics_window;
        let last = match self.db.read(table::METRICS, TIME_METRICS_KEY).await {
            Ok(Some(blob)) if blob.len() == 8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&blob);
                Some(u64::from_be_bytes(b))
            }
            Ok(_) => None,
            Err(e) => {
                error!(error = %e, "time_metrics read failed");
                None
            }
        };

        let wait = match metrics_window(self.now_unix(), last, window) {
            MetricsWindow::Due => {
                self.run_metrics_window().await;
                window
            }
            MetricsWindow::Rebase(wait) => {
                warn!("time_metrics timestamp in the future, re-basing to now");
                let now = self.now_unix().to_be_bytes().to_vec();
                if let Err(e) = self.db.write(table::METRICS, TIME_METRICS_KEY, &now).await {
                    error!(error = %e, "time_metrics persist failed");
                }
                wait
            }
            MetricsWindow::Wait(wait) => wait,
        };

        if let Some(t) = self.metrics_timer.take() {
            t.abort();
        }
        let tx = self.self_tx.clone();
        self.metrics_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = tx.send(NetworkMessage::MetricsTimer).await;
        }));
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn uptime_db_key(ieee: IeeeAddress) -> String {
    format!("uptime/{}", ieee.db_key())
}

/// Parse a RIB row key `"<owner>/<identifier:02x>/<index:02x>"`.
fn parse_rib_key(key: &str) -> Option<(u8, u8)> {
    let mut parts = key.split('/');
    let _owner = parts.next()?;
    let identifier = u8::from_str_radix(parts.next()?, 16).ok()?;
    let index = u8::from_str_radix(parts.next()?, 16).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((identifier, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rib_key_parsing() {
        assert_eq!(parse_rib_key("net/11/01"), Some((0x11, 0x01)));
        assert_eq!(parse_rib_key("00124b0011223344/0a/00"), Some((0x0A, 0x00)));
        assert_eq!(parse_rib_key("garbage"), None);
        assert_eq!(parse_rib_key("a/b/c/d"), None);
    }
}
