//! Core identity and state types shared across the engine.

use std::fmt;

// ============================================================================
// Handles
// ============================================================================

/// Pairing-slot handle, unique within one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub u8);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctrl-{}", self.0)
    }
}

/// Radio network handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetworkId(pub u8);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net-{}", self.0)
    }
}

// ============================================================================
// IEEE Address
// ============================================================================

/// 64-bit hardware identity of a remote. Immutable once bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IeeeAddress(u64);

impl IeeeAddress {
    pub fn new(raw: u64) -> Self {
        IeeeAddress(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        IeeeAddress(u64::from_be_bytes(bytes))
    }

    /// Database key form: lowercase hex, no separators.
    pub fn db_key(&self) -> String {
        hex::encode(self.to_be_bytes())
    }
}

impl fmt::Display for IeeeAddress {
    /// Formats as `aa:bb:cc:dd:ee:ff:00:11`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

// ============================================================================
// Binding / Validation State
// ============================================================================

/// How the pairing was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BindingType {
    /// User-driven pairing (key combination / setup flow).
    Interactive = 0,
    /// Screen-less auto-pairing.
    Automatic = 1,
}

impl BindingType {
    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => BindingType::Automatic,
            _ => BindingType::Interactive,
        }
    }
}

/// Validation procedure used during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValidationType {
    /// Full application-level validation (code entry on screen).
    Application = 0,
    /// Automatic validation without user interaction.
    Automatic = 1,
}

impl ValidationType {
    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => ValidationType::Automatic,
            _ => ValidationType::Application,
        }
    }
}

/// Result of the validation procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValidationState {
    Pending = 0,
    Success = 1,
    Failed = 2,
}

impl ValidationState {
    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => ValidationState::Success,
            2 => ValidationState::Failed,
            _ => ValidationState::Pending,
        }
    }
}

/// Whether the post-validation configuration push has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigurationState {
    Pending = 0,
    Success = 1,
}

impl ConfigurationState {
    pub fn from_u8(b: u8) -> Self {
        match b {
            1 => ConfigurationState::Success,
            _ => ConfigurationState::Pending,
        }
    }
}

/// Why a controller was unbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindReason {
    /// Explicit unbind request (factory reset, UI action).
    Requested,
    /// Validation never succeeded.
    ValidationFailed,
    /// The driver reported the pairing gone.
    DriverIndication,
    /// The slot was reused by a new pairing.
    Replaced,
}

impl fmt::Display for UnbindReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnbindReason::Requested => write!(f, "requested"),
            UnbindReason::ValidationFailed => write!(f, "validation_failed"),
            UnbindReason::DriverIndication => write!(f, "driver_indication"),
            UnbindReason::Replaced => write!(f, "replaced"),
        }
    }
}

// ============================================================================
// Controller Type
// ============================================================================

/// Remote hardware populations this target knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerType {
    Xr11,
    Xr15,
    Xr15v2,
    Xr16,
    Xr19,
    Ble,
    Unknown,
}

impl ControllerType {
    /// Map the vendor device-type byte from a discovery payload.
    pub fn from_device_type(b: u8) -> Self {
        match b {
            0x01 => ControllerType::Xr11,
            0x02 => ControllerType::Xr15,
            0x03 => ControllerType::Xr15v2,
            0x04 => ControllerType::Xr16,
            0x05 => ControllerType::Xr19,
            0x10 => ControllerType::Ble,
            _ => ControllerType::Unknown,
        }
    }

    pub fn device_type(&self) -> u8 {
        match self {
            ControllerType::Xr11 => 0x01,
            ControllerType::Xr15 => 0x02,
            ControllerType::Xr15v2 => 0x03,
            ControllerType::Xr16 => 0x04,
            ControllerType::Xr19 => 0x05,
            ControllerType::Ble => 0x10,
            ControllerType::Unknown => 0x00,
        }
    }

    /// Which liveness polling methods this population supports.
    pub fn polling_methods(&self) -> PollingMethods {
        match self {
            ControllerType::Xr11 => PollingMethods::MAC,
            ControllerType::Xr15 | ControllerType::Xr15v2 | ControllerType::Xr16 => {
                PollingMethods::HEARTBEAT
            }
            ControllerType::Xr19 => PollingMethods::HEARTBEAT | PollingMethods::MAC,
            ControllerType::Ble => PollingMethods::NONE,
            ControllerType::Unknown => PollingMethods::NONE,
        }
    }

    /// Voice-capable populations get METRICS polling and uptime accounting.
    pub fn voice_capable(&self) -> bool {
        matches!(
            self,
            ControllerType::Xr15
                | ControllerType::Xr15v2
                | ControllerType::Xr16
                | ControllerType::Xr19
                | ControllerType::Ble
        )
    }
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerType::Xr11 => "XR11",
            ControllerType::Xr15 => "XR15",
            ControllerType::Xr15v2 => "XR15v2",
            ControllerType::Xr16 => "XR16",
            ControllerType::Xr19 => "XR19",
            ControllerType::Ble => "BLE",
            ControllerType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Polling Methods
// ============================================================================

/// Bitset of liveness polling methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingMethods(u8);

impl PollingMethods {
    pub const NONE: PollingMethods = PollingMethods(0);
    pub const HEARTBEAT: PollingMethods = PollingMethods(0x01);
    pub const MAC: PollingMethods = PollingMethods(0x02);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        PollingMethods(bits & 0x03)
    }

    pub fn supports(&self, method: PollingMethods) -> bool {
        self.0 & method.0 != 0
    }
}

impl std::ops::BitOr for PollingMethods {
    type Output = PollingMethods;
    fn bitor(self, rhs: PollingMethods) -> PollingMethods {
        PollingMethods(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ieee_address_display_and_db_key() {
        let addr = IeeeAddress::new(0x00124B00_11223344);
        assert_eq!(addr.to_string(), "00:12:4b:00:11:22:33:44");
        assert_eq!(addr.db_key(), "00124b0011223344");
        assert_eq!(IeeeAddress::from_be_bytes(addr.to_be_bytes()), addr);
    }

    #[test]
    fn polling_methods_per_type() {
        assert!(ControllerType::Xr19.polling_methods().supports(PollingMethods::HEARTBEAT));
        assert!(ControllerType::Xr19.polling_methods().supports(PollingMethods::MAC));
        assert!(!ControllerType::Xr11.polling_methods().supports(PollingMethods::HEARTBEAT));
        assert!(!ControllerType::Ble.polling_methods().supports(PollingMethods::MAC));
    }

    #[test]
    fn state_round_trips_through_u8() {
        for s in [ValidationState::Pending, ValidationState::Success, ValidationState::Failed] {
            assert_eq!(ValidationState::from_u8(s as u8), s);
        }
        for s in [ConfigurationState::Pending, ConfigurationState::Success] {
            assert_eq!(ConfigurationState::from_u8(s as u8), s);
        }
    }
}
