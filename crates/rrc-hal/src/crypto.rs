//! Link-key derivation for the ASB handshake.
//!
//! Derivation is pluggable so platforms with a secure element can route it
//! into hardware. The engine calls [`CryptoModule::derive`] off its worker via
//! `spawn_blocking`; implementations may block but must be `Send + Sync`.
//! Derived keys never appear in logs.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use rrc_wire::asb::DerivationMethod;

/// Link-key length on this radio.
pub const LINK_KEY_LEN: usize = 16;

/// Errors from key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("derivation method {0:?} not supported by this module")]
    UnsupportedMethod(DerivationMethod),

    #[error("derivation failed: {0}")]
    DerivationFailed(String),
}

/// Inputs to a link-key derivation.
#[derive(Clone)]
pub struct KeyDerivationInput {
    /// The link key currently installed for the pairing slot.
    pub current_key: [u8; LINK_KEY_LEN],
    /// IEEE address of the remote, big-endian.
    pub remote_ieee: u64,
    /// IEEE address of the target, big-endian.
    pub local_ieee: u64,
}

impl std::fmt::Debug for KeyDerivationInput {
    // Key material stays out of Debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDerivationInput")
            .field("remote_ieee", &format_args!("{:016x}", self.remote_ieee))
            .field("local_ieee", &format_args!("{:016x}", self.local_ieee))
            .finish_non_exhaustive()
    }
}

/// Pluggable key-derivation module.
pub trait CryptoModule: Send + Sync {
    /// Derive a fresh link key from the current one.
    fn derive(
        &self,
        input: &KeyDerivationInput,
        method: DerivationMethod,
    ) -> Result<[u8; LINK_KEY_LEN], CryptoError>;

    /// Methods this module can execute, as a wire bitmask.
    fn supported_methods(&self) -> u8;
}

/// Software HMAC-SHA256 derivation.
///
/// New key = first 16 bytes of HMAC-SHA256(current_key,
/// remote_ieee || local_ieee || domain tag).
pub struct HmacKeyDerivation;

const DERIVE_DOMAIN_TAG: &[u8] = b"rrc-asb-link-key-v1";

impl CryptoModule for HmacKeyDerivation {
    fn derive(
        &self,
        input: &KeyDerivationInput,
        method: DerivationMethod,
    ) -> Result<[u8; LINK_KEY_LEN], CryptoError> {
        if method != DerivationMethod::HmacSha256 {
            return Err(CryptoError::UnsupportedMethod(method));
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(&input.current_key)
            .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
        mac.update(&input.remote_ieee.to_be_bytes());
        mac.update(&input.local_ieee.to_be_bytes());
        mac.update(DERIVE_DOMAIN_TAG);
        let digest = mac.finalize().into_bytes();

        let mut key = [0u8; LINK_KEY_LEN];
        key.copy_from_slice(&digest[..LINK_KEY_LEN]);
        Ok(key)
    }

    fn supported_methods(&self) -> u8 {
        DerivationMethod::HmacSha256 as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> KeyDerivationInput {
        KeyDerivationInput {
            current_key: [0x11; LINK_KEY_LEN],
            remote_ieee: 0x00124B_00112233AA,
            local_ieee: 0x00124B_0099887766,
        }
    }

    #[test]
    fn derivation_is_deterministic_and_changes_key() {
        let module = HmacKeyDerivation;
        let k1 = module.derive(&input(), DerivationMethod::HmacSha256).unwrap();
        let k2 = module.derive(&input(), DerivationMethod::HmacSha256).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, input().current_key);
    }

    #[test]
    fn derivation_depends_on_both_addresses() {
        let module = HmacKeyDerivation;
        let base = module.derive(&input(), DerivationMethod::HmacSha256).unwrap();

        let mut other = input();
        other.remote_ieee ^= 1;
        assert_ne!(base, module.derive(&other, DerivationMethod::HmacSha256).unwrap());

        let mut other = input();
        other.local_ieee ^= 1;
        assert_ne!(base, module.derive(&other, DerivationMethod::HmacSha256).unwrap());
    }

    #[test]
    fn unsupported_method_rejected() {
        let module = HmacKeyDerivation;
        assert!(matches!(
            module.derive(&input(), DerivationMethod::AesCmac),
            Err(CryptoError::UnsupportedMethod(DerivationMethod::AesCmac))
        ));
    }

    #[test]
    fn debug_output_hides_key_material() {
        let dbg = format!("{:?}", input());
        assert!(!dbg.contains("11, 17"));
        assert!(!dbg.contains("current_key"));
    }
}
