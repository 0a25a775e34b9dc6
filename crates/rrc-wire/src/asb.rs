//! ASB key-derivation method negotiation.
//!
//! Each side advertises its supported derivation methods as a one-byte
//! bitmask, one bit per method. The negotiated method is the highest-priority
//! bit in the intersection of the controller-supported, network-configured,
//! and platform-supported masks; by convention the lowest bit index carries
//! the highest priority.

use crate::WireError;

/// Link-key derivation methods, one bit each in the advertised mask.
///
/// Bit index doubles as priority: bit 0 beats bit 1 beats bit 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DerivationMethod {
    /// HMAC-SHA256 over the current link key.
    HmacSha256 = 0x01,
    /// AES-128-CMAC over the current link key.
    AesCmac = 0x02,
    /// Vendor-reserved method.
    Vendor = 0x04,
}

impl DerivationMethod {
    /// All methods in priority order (highest first).
    pub const ALL: [DerivationMethod; 3] = [
        DerivationMethod::HmacSha256,
        DerivationMethod::AesCmac,
        DerivationMethod::Vendor,
    ];

    /// Decode a single-method byte (exactly one bit set).
    pub fn from_wire(b: u8) -> Result<Self, WireError> {
        match b {
            0x01 => Ok(DerivationMethod::HmacSha256),
            0x02 => Ok(DerivationMethod::AesCmac),
            0x04 => Ok(DerivationMethod::Vendor),
            other => Err(WireError::UnknownDerivationMethod(other)),
        }
    }
}

/// Pick the negotiated method from the three advertised masks.
///
/// Returns `None` when the intersection is empty, which callers treat as a
/// negotiation failure (the link keeps its current key).
pub fn negotiate_method(controller: u8, network: u8, platform: u8) -> Option<DerivationMethod> {
    let common = controller & network & platform;
    DerivationMethod::ALL.into_iter().find(|m| common & (*m as u8) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_bit_wins() {
        let m = negotiate_method(0x07, 0x03, 0x03).unwrap();
        assert_eq!(m, DerivationMethod::HmacSha256);
    }

    #[test]
    fn falls_back_to_next_bit() {
        // Controller cannot do HMAC-SHA256, everyone can do AES-CMAC.
        let m = negotiate_method(0x06, 0x07, 0x07).unwrap();
        assert_eq!(m, DerivationMethod::AesCmac);
    }

    #[test]
    fn empty_intersection_is_none() {
        assert_eq!(negotiate_method(0x01, 0x02, 0x07), None);
        assert_eq!(negotiate_method(0x00, 0xFF, 0xFF), None);
    }

    #[test]
    fn from_wire_rejects_unknown_and_multi_bit_bytes() {
        assert!(matches!(
            DerivationMethod::from_wire(0x08),
            Err(WireError::UnknownDerivationMethod(0x08))
        ));
        // Exactly one bit must be set.
        assert!(matches!(
            DerivationMethod::from_wire(0x03),
            Err(WireError::UnknownDerivationMethod(0x03))
        ));
    }
}
