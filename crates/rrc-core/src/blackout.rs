//! Blackout governor: network-wide lockout against repeated pairing failures.
//!
//! Counts consecutive pairing failures and, past a threshold, closes the
//! network to new pairings for an escalating interval. After enough completed
//! blackout cycles the governor latches closed until process restart — a
//! deliberate fail-safe against a remote population stuck in a pairing loop.
//! All state is in-memory and resets on restart.

use std::time::Duration;

use tracing::{info, warn};

// ============================================================================
// Settings
// ============================================================================

/// Governor thresholds. Sourced from local configuration; a runtime policy
/// feed may override them unless `force_local` pins the local values.
#[derive(Debug, Clone)]
pub struct BlackoutSettings {
    /// Consecutive failures that open a blackout.
    pub fail_threshold: u32,
    /// Base blackout interval; multiplied by the escalation increment.
    pub blackout_time: Duration,
    /// Completed blackout cycles after which the governor latches.
    pub reboot_threshold: u32,
    /// Ignore runtime policy overrides.
    pub force_local: bool,
}

impl Default for BlackoutSettings {
    fn default() -> Self {
        BlackoutSettings {
            fail_threshold: 3,
            blackout_time: Duration::from_secs(60),
            reboot_threshold: 5,
            force_local: false,
        }
    }
}

/// Snapshot of the governor for status and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackoutState {
    pub fail_count: u32,
    pub blackout_count: u32,
    pub is_blackout: bool,
    pub time_increment: u32,
}

// ============================================================================
// Governor
// ============================================================================

/// Pairing-failure lockout state machine: `Normal → Blackout → Normal`.
pub struct BlackoutGovernor {
    settings: BlackoutSettings,
    fail_count: u32,
    blackout_count: u32,
    in_blackout: bool,
    /// Escalation multiplier; grows by one per completed blackout cycle.
    time_increment: u32,
}

impl BlackoutGovernor {
    pub fn new(settings: BlackoutSettings) -> Self {
        BlackoutGovernor {
            settings,
            fail_count: 0,
            blackout_count: 0,
            in_blackout: false,
            time_increment: 1,
        }
    }

    pub fn is_blackout(&self) -> bool {
        self.in_blackout
    }

    pub fn state(&self) -> BlackoutState {
        BlackoutState {
            fail_count: self.fail_count,
            blackout_count: self.blackout_count,
            is_blackout: self.in_blackout,
            time_increment: self.time_increment,
        }
    }

    /// Record one pairing failure. Returns the blackout duration to arm when
    /// this failure opens a blackout.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.fail_count += 1;
        if self.fail_count >= self.settings.fail_threshold && !self.in_blackout {
            self.blackout_count += 1;
            self.in_blackout = true;
            let duration = self.settings.blackout_time * self.time_increment;
            warn!(
                fail_count = self.fail_count,
                blackout_count = self.blackout_count,
                duration_secs = duration.as_secs(),
                "pairing blackout opened"
            );
            return Some(duration);
        }
        None
    }

    /// Record a pairing success: full de-escalation.
    pub fn record_success(&mut self) {
        self.fail_count = 0;
        self.time_increment = 1;
    }

    /// The blackout timer fired. Returns true when the network reopened;
    /// false when the governor latched at the reboot threshold.
    pub fn on_timer_expired(&mut self) -> bool {
        if self.blackout_count >= self.settings.reboot_threshold {
            // Latched until process restart, by design.
            warn!(
                blackout_count = self.blackout_count,
                "blackout latched at reboot threshold, staying closed"
            );
            return false;
        }
        self.fail_count = 0;
        self.time_increment += 1;
        self.in_blackout = false;
        info!(time_increment = self.time_increment, "pairing blackout lifted");
        true
    }

    /// Apply a runtime policy override unless local settings are pinned.
    pub fn apply_policy(&mut self, settings: BlackoutSettings) {
        if self.settings.force_local {
            info!("blackout settings pinned locally, policy override ignored");
            return;
        }
        self.settings = BlackoutSettings { force_local: self.settings.force_local, ..settings };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> BlackoutGovernor {
        BlackoutGovernor::new(BlackoutSettings::default())
    }

    #[test]
    fn three_failures_open_sixty_second_blackout() {
        let mut gov = governor();
        assert_eq!(gov.record_failure(), None);
        assert_eq!(gov.record_failure(), None);
        let armed = gov.record_failure().expect("third failure opens blackout");
        assert_eq!(armed, Duration::from_secs(60));

        let state = gov.state();
        assert!(state.is_blackout);
        assert_eq!(state.blackout_count, 1);

        // Timer expiry reopens and escalates.
        assert!(gov.on_timer_expired());
        let state = gov.state();
        assert_eq!(state.fail_count, 0);
        assert_eq!(state.time_increment, 2);
        assert!(!state.is_blackout);
    }

    #[test]
    fn success_fully_deescalates() {
        let mut gov = governor();
        for _ in 0..3 {
            gov.record_failure();
        }
        gov.on_timer_expired();
        assert_eq!(gov.state().time_increment, 2);

        gov.record_success();
        let state = gov.state();
        assert_eq!(state.fail_count, 0);
        assert_eq!(state.time_increment, 1);
    }

    #[test]
    fn escalation_multiplies_blackout_time() {
        let mut gov = governor();
        for _ in 0..3 {
            gov.record_failure();
        }
        gov.on_timer_expired();

        // Next cycle without an intervening success runs twice as long.
        gov.record_failure();
        gov.record_failure();
        let armed = gov.record_failure().unwrap();
        assert_eq!(armed, Duration::from_secs(120));
        assert_eq!(gov.state().blackout_count, 2);
    }

    #[test]
    fn latches_at_reboot_threshold() {
        let mut gov = BlackoutGovernor::new(BlackoutSettings {
            reboot_threshold: 2,
            ..BlackoutSettings::default()
        });
        for cycle in 0..2 {
            for _ in 0..3 {
                gov.record_failure();
            }
            if cycle == 0 {
                assert!(gov.on_timer_expired());
            }
        }
        // Second cycle reaches the threshold: the timer no longer reopens.
        assert!(!gov.on_timer_expired());
        assert!(gov.is_blackout());
        assert!(!gov.on_timer_expired());
    }

    #[test]
    fn further_failures_during_blackout_do_not_stack_timers() {
        let mut gov = governor();
        for _ in 0..3 {
            gov.record_failure();
        }
        assert!(gov.is_blackout());
        // Already in blackout: no new duration to arm.
        assert_eq!(gov.record_failure(), None);
        assert_eq!(gov.state().blackout_count, 1);
    }

    #[test]
    fn policy_override_respects_force_local() {
        let mut pinned = BlackoutGovernor::new(BlackoutSettings {
            force_local: true,
            ..BlackoutSettings::default()
        });
        pinned.apply_policy(BlackoutSettings {
            fail_threshold: 1,
            ..BlackoutSettings::default()
        });
        assert_eq!(pinned.record_failure(), None, "pinned threshold still 3");

        let mut open = governor();
        open.apply_policy(BlackoutSettings { fail_threshold: 1, ..BlackoutSettings::default() });
        assert!(open.record_failure().is_some(), "overridden threshold is 1");
    }
}
