//! Per-remote controller state machine.
//!
//! A controller is created on first discovery indication (or from its
//! database row at startup) in `ValidationPending`, becomes `Validated` when
//! the validation procedure succeeds, and is deleted on unbind or persistent
//! validation failure. The struct is pure state owned by the network worker;
//! transitions return outcome values describing the effects the worker must
//! run (persist, emit events, push configuration), never performing I/O
//! themselves.

use tracing::debug;

use crate::polling::{ActionQueue, PollingAction, UptimeCounters};
use crate::rib::RibRegistry;
use crate::types::{
    BindingType, ConfigurationState, ControllerId, ControllerType, IeeeAddress, UnbindReason,
    ValidationState, ValidationType,
};
use rrc_hal::db::DbError;

// ============================================================================
// Persistent Record
// ============================================================================

/// Fixed-width database row for one bound controller.
///
/// Layout (big-endian): `version(1) controller_id(1) device_type(1)
/// binding_type(1) validation_type(1) security_type(1) validation_state(1)
/// configuration_state(1) ieee(8) time_binding(8) last_key_time(8)
/// last_key_code(2) asb_method(1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRecord {
    pub controller_id: ControllerId,
    pub controller_type: ControllerType,
    pub binding_type: BindingType,
    pub validation_type: ValidationType,
    pub security_type: u8,
    pub validation: ValidationState,
    pub configuration: ConfigurationState,
    pub ieee_address: IeeeAddress,
    /// Unix seconds of validation success.
    pub time_binding: u64,
    /// Unix seconds of the last key activity.
    pub last_key_time: u64,
    pub last_key_code: u16,
    /// Negotiated ASB derivation method mask, 0 when never negotiated.
    pub asb_method: u8,
}

const RECORD_VERSION: u8 = 1;
const RECORD_LEN: usize = 35;

impl ControllerRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        buf.push(RECORD_VERSION);
        buf.push(self.controller_id.0);
        buf.push(self.controller_type.device_type());
        buf.push(self.binding_type as u8);
        buf.push(self.validation_type as u8);
        buf.push(self.security_type);
        buf.push(self.validation as u8);
        buf.push(self.configuration as u8);
        buf.extend_from_slice(&self.ieee_address.to_be_bytes());
        buf.extend_from_slice(&self.time_binding.to_be_bytes());
        buf.extend_from_slice(&self.last_key_time.to_be_bytes());
        buf.extend_from_slice(&self.last_key_code.to_be_bytes());
        buf.push(self.asb_method);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DbError> {
        if raw.len() != RECORD_LEN || raw[0] != RECORD_VERSION {
            return Err(DbError::DataCorruption(format!(
                "controller record: len {} version {}",
                raw.len(),
                raw.first().copied().unwrap_or(0)
            )));
        }
        let mut ieee = [0u8; 8];
        ieee.copy_from_slice(&raw[8..16]);
        let mut u64buf = [0u8; 8];
        u64buf.copy_from_slice(&raw[16..24]);
        let time_binding = u64::from_be_bytes(u64buf);
        u64buf.copy_from_slice(&raw[24..32]);
        let last_key_time = u64::from_be_bytes(u64buf);
        Ok(ControllerRecord {
            controller_id: ControllerId(raw[1]),
            controller_type: ControllerType::from_device_type(raw[2]),
            binding_type: BindingType::from_u8(raw[3]),
            validation_type: ValidationType::from_u8(raw[4]),
            security_type: raw[5],
            validation: ValidationState::from_u8(raw[6]),
            configuration: ConfigurationState::from_u8(raw[7]),
            ieee_address: IeeeAddress::from_be_bytes(ieee),
            time_binding,
            last_key_time,
            last_key_code: u16::from_be_bytes([raw[32], raw[33]]),
            asb_method: raw[34],
        })
    }
}

// ============================================================================
// Transition Outcomes
// ============================================================================

/// Effects the worker must run after a `validate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateOutcome {
    /// First `Pending → Success`: persist the row and RIB snapshot, emit the
    /// bound event, push the polling configuration, start ASB.
    NewlyValidated,
    /// Repeated `Success → Success`: idempotent, no persistence.
    AlreadyValidated,
    /// `Success → Pending` (re-pairing): configuration state was reset.
    RevertedToPending,
    /// Validation failed; the worker deletes the controller.
    Failed,
}

/// Snapshot exposed for status queries.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub controller_id: ControllerId,
    pub ieee_address: IeeeAddress,
    pub controller_type: ControllerType,
    pub binding_type: BindingType,
    pub validation: ValidationState,
    pub configuration: ConfigurationState,
    pub time_binding: u64,
    pub last_key_time: u64,
    pub last_heartbeat_ms: Option<u64>,
    pub uptime_secs: u64,
    pub privacy_secs: u64,
    pub pending_actions: usize,
}

// ============================================================================
// Controller
// ============================================================================

/// State for one paired remote, owned exclusively by its network worker.
pub struct Controller {
    id: ControllerId,
    ieee: IeeeAddress,
    controller_type: ControllerType,
    binding_type: BindingType,
    validation_type: ValidationType,
    security_type: u8,
    validation: ValidationState,
    configuration: ConfigurationState,
    time_binding: u64,
    last_key_time: u64,
    last_key_code: u16,
    asb_method: u8,
    /// This remote's configuration mirror.
    pub rib: RibRegistry,
    /// Queued actions delivered through heartbeat responses.
    pub actions: ActionQueue,
    /// Action handed to the driver but not yet confirmed.
    pub in_flight: Option<PollingAction>,
    /// Driver timestamp of the last accepted heartbeat.
    pub last_heartbeat_ms: Option<u64>,
    /// Uptime/privacy accounting for voice-capable populations.
    pub uptime: UptimeCounters,
    /// Shared "configuration changed" flag, set by network-wide RIB writes
    /// and reported to the remote on its next heartbeat response.
    pub rib_updated: bool,
    /// Whether a database row exists for this controller.
    persisted: bool,
    /// Set while an unbind is running so a second unbind is a no-op.
    unbound: bool,
}

impl Controller {
    /// Controller for a freshly discovered remote, not yet validated.
    pub fn discovered(
        id: ControllerId,
        ieee: IeeeAddress,
        controller_type: ControllerType,
        binding_type: BindingType,
    ) -> Self {
        Controller {
            id,
            ieee,
            controller_type,
            binding_type,
            validation_type: ValidationType::Application,
            security_type: 0,
            validation: ValidationState::Pending,
            configuration: ConfigurationState::Pending,
            time_binding: 0,
            last_key_time: 0,
            last_key_code: 0,
            asb_method: 0,
            rib: RibRegistry::per_controller(controller_type, ieee),
            actions: ActionQueue::new(),
            in_flight: None,
            last_heartbeat_ms: None,
            uptime: UptimeCounters::default(),
            rib_updated: false,
            persisted: false,
            unbound: false,
        }
    }

    /// Rebuild a controller from its database row at startup.
    pub fn from_record(record: ControllerRecord) -> Self {
        let mut ctrl = Controller::discovered(
            record.controller_id,
            record.ieee_address,
            record.controller_type,
            record.binding_type,
        );
        ctrl.validation_type = record.validation_type;
        ctrl.security_type = record.security_type;
        ctrl.validation = record.validation;
        ctrl.configuration = record.configuration;
        ctrl.time_binding = record.time_binding;
        ctrl.last_key_time = record.last_key_time;
        ctrl.last_key_code = record.last_key_code;
        ctrl.asb_method = record.asb_method;
        ctrl.persisted = true;
        ctrl
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn ieee_address(&self) -> IeeeAddress {
        self.ieee
    }

    pub fn controller_type(&self) -> ControllerType {
        self.controller_type
    }

    pub fn validation_state(&self) -> ValidationState {
        self.validation
    }

    pub fn configuration_state(&self) -> ConfigurationState {
        self.configuration
    }

    pub fn is_validated(&self) -> bool {
        self.validation == ValidationState::Success
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn negotiated_asb_method(&self) -> u8 {
        self.asb_method
    }

    pub fn set_negotiated_asb_method(&mut self, method: u8) {
        self.asb_method = method;
    }

    /// Apply a validation result.
    ///
    /// `time_binding`/`time_last_key` default to `now_unix` when absent.
    pub fn validate(
        &mut self,
        binding_type: BindingType,
        validation_type: ValidationType,
        result: ValidationState,
        time_binding: Option<u64>,
        time_last_key: Option<u64>,
        now_unix: u64,
    ) -> ValidateOutcome {
        self.binding_type = binding_type;
        self.validation_type = validation_type;

        match (self.validation, result) {
            (ValidationState::Success, ValidationState::Success) => {
                debug!(controller = %self.id, "repeated validation success, no-op");
                ValidateOutcome::AlreadyValidated
            }
            (_, ValidationState::Success) => {
                self.validation = ValidationState::Success;
                self.time_binding = time_binding.unwrap_or(now_unix);
                self.last_key_time = time_last_key.unwrap_or(now_unix);
                self.persisted = true;
                ValidateOutcome::NewlyValidated
            }
            (ValidationState::Success, ValidationState::Pending) => {
                // Re-pairing: the remote must be configured again.
                self.validation = ValidationState::Pending;
                self.configuration = ConfigurationState::Pending;
                ValidateOutcome::RevertedToPending
            }
            (_, ValidationState::Failed) => {
                self.validation = ValidationState::Failed;
                ValidateOutcome::Failed
            }
            (_, ValidationState::Pending) => {
                self.validation = ValidationState::Pending;
                ValidateOutcome::RevertedToPending
            }
        }
    }

    /// Mark the unbind as taken; returns false when already unbound so a
    /// double-unbind is a no-op.
    pub fn take_unbind(&mut self, reason: UnbindReason) -> bool {
        if self.unbound {
            return false;
        }
        debug!(controller = %self.id, %reason, "controller unbinding");
        self.unbound = true;
        true
    }

    /// Record key activity from a heartbeat key-press trigger.
    pub fn touch_key(&mut self, now_unix: u64) {
        self.last_key_time = now_unix;
    }

    /// The configuration push completed (delivery of the polling
    /// configuration action was confirmed).
    pub fn mark_configured(&mut self) {
        self.configuration = ConfigurationState::Success;
    }

    pub fn record(&self) -> ControllerRecord {
        ControllerRecord {
            controller_id: self.id,
            controller_type: self.controller_type,
            binding_type: self.binding_type,
            validation_type: self.validation_type,
            security_type: self.security_type,
            validation: self.validation,
            configuration: self.configuration,
            ieee_address: self.ieee,
            time_binding: self.time_binding,
            last_key_time: self.last_key_time,
            last_key_code: self.last_key_code,
            asb_method: self.asb_method,
        }
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            controller_id: self.id,
            ieee_address: self.ieee,
            controller_type: self.controller_type,
            binding_type: self.binding_type,
            validation: self.validation,
            configuration: self.configuration,
            time_binding: self.time_binding,
            last_key_time: self.last_key_time,
            last_heartbeat_ms: self.last_heartbeat_ms,
            uptime_secs: self.uptime.uptime_secs(),
            privacy_secs: self.uptime.privacy_secs(),
            pending_actions: self.actions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        Controller::discovered(
            ControllerId(1),
            IeeeAddress::new(0x00124B00_DEADBEEF),
            ControllerType::Xr15,
            BindingType::Interactive,
        )
    }

    #[test]
    fn record_round_trip() {
        let mut ctrl = controller();
        ctrl.validate(
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            Some(1_700_000_000),
            None,
            1_700_000_100,
        );
        let record = ctrl.record();
        assert_eq!(ControllerRecord::decode(&record.encode()).unwrap(), record);
    }

    #[test]
    fn record_decode_rejects_garbage() {
        assert!(ControllerRecord::decode(&[0u8; 10]).is_err());
        let mut raw = controller().record().encode();
        raw[0] = 99;
        assert!(ControllerRecord::decode(&raw).is_err());
    }

    #[test]
    fn first_validation_success_is_newly_validated() {
        let mut ctrl = controller();
        let outcome = ctrl.validate(
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            None,
            None,
            1_700_000_000,
        );
        assert_eq!(outcome, ValidateOutcome::NewlyValidated);
        assert!(ctrl.is_validated());
        // Timestamps default to now.
        assert_eq!(ctrl.record().time_binding, 1_700_000_000);
        assert_eq!(ctrl.record().last_key_time, 1_700_000_000);
    }

    #[test]
    fn repeated_validation_success_is_idempotent() {
        let mut ctrl = controller();
        ctrl.validate(
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            Some(100),
            Some(100),
            100,
        );
        let outcome = ctrl.validate(
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            Some(999),
            Some(999),
            999,
        );
        assert_eq!(outcome, ValidateOutcome::AlreadyValidated);
        // The original binding time stands.
        assert_eq!(ctrl.record().time_binding, 100);
    }

    #[test]
    fn repair_resets_configuration_state() {
        let mut ctrl = controller();
        ctrl.validate(
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            None,
            None,
            100,
        );
        ctrl.mark_configured();
        assert_eq!(ctrl.configuration_state(), ConfigurationState::Success);

        let outcome = ctrl.validate(
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Pending,
            None,
            None,
            200,
        );
        assert_eq!(outcome, ValidateOutcome::RevertedToPending);
        assert_eq!(ctrl.configuration_state(), ConfigurationState::Pending);
    }

    #[test]
    fn unbind_runs_at_most_once() {
        let mut ctrl = controller();
        assert!(ctrl.take_unbind(UnbindReason::Requested));
        assert!(!ctrl.take_unbind(UnbindReason::Requested));
    }
}
