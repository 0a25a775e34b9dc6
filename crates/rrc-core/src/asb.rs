//! ASB link-key negotiation sessions.
//!
//! ASB rotates the shared link key once per freshly validated controller,
//! under a hard wall-clock budget. This module owns the per-controller
//! session bookkeeping: at most one outstanding negotiation per controller,
//! generation counters so a late derivation result is recognized as stale
//! and discarded, and the fallback counter fed by timeouts. The derivation
//! itself runs through the pluggable `CryptoModule` off the worker; the
//! network worker arms the timeout timer and installs the key.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::types::ControllerId;
use rrc_wire::asb::{negotiate_method, DerivationMethod};

// ============================================================================
// Configuration
// ============================================================================

/// Negotiation budget and network policy.
#[derive(Debug, Clone)]
pub struct AsbConfig {
    /// Base component of the negotiation budget. Named after the pairing
    /// blackout interval it derives from, but this is the ASB budget, not
    /// the governor's lockout timer.
    pub blackout_time: Duration,
    /// Extra wait allowed for the remote's response.
    pub response_wait: Duration,
    /// Derivation methods this network is configured to allow (wire mask).
    pub network_methods: u8,
}

impl Default for AsbConfig {
    fn default() -> Self {
        AsbConfig {
            blackout_time: Duration::from_secs(5),
            response_wait: Duration::from_secs(2),
            network_methods: DerivationMethod::HmacSha256 as u8,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One outstanding negotiation.
#[derive(Debug, Clone)]
pub struct AsbSession {
    pub controller_id: ControllerId,
    pub method: DerivationMethod,
    pub started: Instant,
    /// Distinguishes this session's timer and derivation result from stale
    /// ones after a timeout tore the session down.
    pub generation: u64,
}

impl AsbSession {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

// ============================================================================
// Negotiator
// ============================================================================

/// Per-network ASB session table.
pub struct AsbNegotiator {
    config: AsbConfig,
    sessions: HashMap<ControllerId, AsbSession>,
    fallback_count: u32,
    next_generation: u64,
}

impl AsbNegotiator {
    pub fn new(config: AsbConfig) -> Self {
        AsbNegotiator { config, sessions: HashMap::new(), fallback_count: 0, next_generation: 0 }
    }

    pub fn config(&self) -> &AsbConfig {
        &self.config
    }

    /// Negotiation budget: `blackout_time + response_wait`.
    pub fn budget(&self) -> Duration {
        self.config.blackout_time + self.config.response_wait
    }

    /// Times a negotiation fell back to the existing key.
    pub fn fallback_count(&self) -> u32 {
        self.fallback_count
    }

    pub fn is_outstanding(&self, id: ControllerId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Start a negotiation for `id`.
    ///
    /// Picks the method from the intersection of the controller-advertised,
    /// network-configured, and platform-supported masks; rejects a second
    /// trigger while one is outstanding.
    pub fn begin(
        &mut self,
        id: ControllerId,
        controller_methods: u8,
        platform_methods: u8,
    ) -> Result<AsbSession, CoreError> {
        if self.sessions.contains_key(&id) {
            warn!(controller = %id, "asb trigger rejected, negotiation outstanding");
            return Err(CoreError::AsbOutstanding(id));
        }
        let method =
            negotiate_method(controller_methods, self.config.network_methods, platform_methods)
                .ok_or(CoreError::AsbNoMethod)?;

        let generation = self.next_generation;
        self.next_generation += 1;
        let session =
            AsbSession { controller_id: id, method, started: Instant::now(), generation };
        debug!(controller = %id, ?method, generation, "asb negotiation started");
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// The derived key was installed. Returns the closed session, or `None`
    /// when the negotiation already timed out and this result is stale.
    pub fn complete(&mut self, id: ControllerId, generation: u64) -> Option<AsbSession> {
        match self.sessions.get(&id) {
            Some(s) if s.generation == generation => self.sessions.remove(&id),
            _ => None,
        }
    }

    /// Drop any outstanding session for `id`. Used when the controller is
    /// unbound mid-negotiation; the late derivation result becomes stale.
    pub fn cancel(&mut self, id: ControllerId) {
        self.sessions.remove(&id);
    }

    /// The budget timer fired. Returns the abandoned session when it was
    /// still outstanding; the caller reports a pairing failure and releases
    /// crypto resources exactly once.
    pub fn on_timeout(&mut self, id: ControllerId, generation: u64) -> Option<AsbSession> {
        match self.sessions.get(&id) {
            Some(s) if s.generation == generation => {
                self.fallback_count += 1;
                self.sessions.remove(&id)
            }
            _ => None,
        }
    }
}
