//! Typed codecs for structured RIB attribute values.
//!
//! Every structured attribute has one codec type with a `WIRE_LEN`, an
//! `encode` into exactly that many bytes, and a `decode` that rejects any
//! other length. Opaque attributes (IRDB signature, general-purpose blobs)
//! are carried as raw byte arrays by the registry and have no codec here.

use bytes::{BufMut, BytesMut};

use crate::WireError;

// ============================================================================
// Attribute Identifiers
// ============================================================================

/// RIB attribute identifier space.
pub mod id {
    /// Software/hardware/IRDB version quadruples (index 0/1/2).
    pub const VERSIONING: u8 = 0x02;
    /// Battery telemetry reported by the remote.
    pub const BATTERY_STATUS: u8 = 0x03;
    /// Voice command status.
    pub const VOICE_COMMAND_STATUS: u8 = 0x04;
    /// Voice command length.
    pub const VOICE_COMMAND_LENGTH: u8 = 0x05;
    /// Polling methods supported/enabled for this controller.
    pub const POLLING_METHODS: u8 = 0x08;
    /// Update polling period.
    pub const UPDATE_POLLING_PERIOD: u8 = 0x09;
    /// Heartbeat polling configuration pushed by the target.
    pub const POLLING_CONFIGURATION: u8 = 0x0A;
    /// Privacy mode toggle.
    pub const PRIVACY: u8 = 0x0B;
    /// Controller capability bits.
    pub const CONTROLLER_CAPABILITIES: u8 = 0x0C;
    /// IRDB signature/status blob.
    pub const IRDB_STATUS: u8 = 0x10;
    /// Far-field / general-purpose opaque blob, network-wide.
    pub const GENERAL_PURPOSE: u8 = 0x11;
    /// Metrics counters uploaded by the remote.
    pub const METRICS: u8 = 0x12;
}

/// Versioning attribute sub-field indices.
pub mod versioning_index {
    pub const SOFTWARE: u8 = 0;
    pub const HARDWARE: u8 = 1;
    pub const IRDB: u8 = 2;
}

// ============================================================================
// Version
// ============================================================================

/// One version quadruple, as stored per versioning index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
    pub patch: u8,
}

impl Version {
    pub const WIRE_LEN: usize = 4;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        buf.put_u8(self.revision);
        buf.put_u8(self.patch);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() != Self::WIRE_LEN {
            return Err(WireError::LengthMismatch { expected: Self::WIRE_LEN, got: raw.len() });
        }
        Ok(Version { major: raw[0], minor: raw[1], revision: raw[2], patch: raw[3] })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.revision, self.patch)
    }
}

// ============================================================================
// Polling Configuration
// ============================================================================

/// Heartbeat polling configuration pushed to a remote.
///
/// Wire form, 8 bytes: `trigger_mask(1) keypress_counter(1)
/// time_interval_ms(4, BE) reserved(2, BE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfiguration {
    /// Which triggers the remote should heartbeat on.
    pub trigger_mask: u8,
    /// Heartbeat every N key presses when the key-press trigger is set.
    pub keypress_counter: u8,
    /// Periodic heartbeat interval in milliseconds.
    pub time_interval_ms: u32,
    pub reserved: u16,
}

impl PollingConfiguration {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(self.trigger_mask);
        buf.put_u8(self.keypress_counter);
        buf.put_u32(self.time_interval_ms);
        buf.put_u16(self.reserved);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() != Self::WIRE_LEN {
            return Err(WireError::LengthMismatch { expected: Self::WIRE_LEN, got: raw.len() });
        }
        Ok(PollingConfiguration {
            trigger_mask: raw[0],
            keypress_counter: raw[1],
            time_interval_ms: u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]]),
            reserved: u16::from_be_bytes([raw[6], raw[7]]),
        })
    }
}

impl Default for PollingConfiguration {
    fn default() -> Self {
        PollingConfiguration {
            trigger_mask: crate::frames::trigger::TIME | crate::frames::trigger::KEY_PRESS,
            keypress_counter: 5,
            time_interval_ms: 60_000,
            reserved: 0,
        }
    }
}

// ============================================================================
// Battery Status
// ============================================================================

/// Battery telemetry reported by the remote.
///
/// Wire form, 8 bytes: `flags(1) voltage_loaded(1) voltage_unloaded(1)
/// percent(1) key_presses(4, BE)`. Voltages are in units of 4/255 V.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryStatus {
    pub flags: u8,
    pub voltage_loaded: u8,
    pub voltage_unloaded: u8,
    pub percent: u8,
    pub key_presses: u32,
}

impl BatteryStatus {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(self.flags);
        buf.put_u8(self.voltage_loaded);
        buf.put_u8(self.voltage_unloaded);
        buf.put_u8(self.percent);
        buf.put_u32(self.key_presses);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() != Self::WIRE_LEN {
            return Err(WireError::LengthMismatch { expected: Self::WIRE_LEN, got: raw.len() });
        }
        Ok(BatteryStatus {
            flags: raw[0],
            voltage_loaded: raw[1],
            voltage_unloaded: raw[2],
            percent: raw[3],
            key_presses: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }
}

// ============================================================================
// Metrics Counters
// ============================================================================

/// Uptime/privacy counters uploaded on a METRICS action.
///
/// Wire form, 8 bytes: `uptime_seconds(4, BE) privacy_seconds(4, BE)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsCounters {
    pub uptime_seconds: u32,
    pub privacy_seconds: u32,
}

impl MetricsCounters {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.uptime_seconds);
        buf.put_u32(self.privacy_seconds);
        buf
    }

    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() != Self::WIRE_LEN {
            return Err(WireError::LengthMismatch { expected: Self::WIRE_LEN, got: raw.len() });
        }
        Ok(MetricsCounters {
            uptime_seconds: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            privacy_seconds: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_display() {
        let v = Version { major: 2, minor: 5, revision: 0, patch: 11 };
        assert_eq!(v.to_string(), "2.5.0.11");
    }

    #[test]
    fn polling_configuration_round_trip() {
        let cfg = PollingConfiguration {
            trigger_mask: 0x13,
            keypress_counter: 10,
            time_interval_ms: 300_000,
            reserved: 0,
        };
        let wire = cfg.encode();
        assert_eq!(wire.len(), PollingConfiguration::WIRE_LEN);
        assert_eq!(PollingConfiguration::decode(&wire).unwrap(), cfg);
    }

    #[test]
    fn decode_rejects_short_and_long_buffers() {
        assert!(matches!(
            PollingConfiguration::decode(&[0u8; 7]),
            Err(WireError::LengthMismatch { expected: 8, got: 7 })
        ));
        assert!(matches!(
            BatteryStatus::decode(&[0u8; 9]),
            Err(WireError::LengthMismatch { expected: 8, got: 9 })
        ));
        assert!(matches!(
            Version::decode(&[1, 2, 3]),
            Err(WireError::LengthMismatch { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn battery_status_round_trip() {
        let b = BatteryStatus {
            flags: 0x01,
            voltage_loaded: 180,
            voltage_unloaded: 192,
            percent: 74,
            key_presses: 120_333,
        };
        assert_eq!(BatteryStatus::decode(&b.encode()).unwrap(), b);
    }
}
