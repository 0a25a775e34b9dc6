//! Polling engine: heartbeat protocol, action queue, liveness accounting.
//!
//! Heartbeats are remote-initiated; the target must answer within a bounded
//! window. The engine computes the response and leaves transmission to the
//! network worker, which holds the reply for the configured idle delay after
//! the frame's arrival and sends through the driver. Driver rx timestamps are
//! used only for gap accounting between heartbeats; they share no epoch with
//! the worker's clock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tracing::debug;

use crate::controller::Controller;
use rrc_wire::attrs::{id, PollingConfiguration};
use rrc_wire::frames::{
    response_flags, trigger, HeartbeatFrame, HeartbeatResponse, PollingActionKind,
    HEARTBEAT_PAYLOAD_MAX,
};

// ============================================================================
// Configuration
// ============================================================================

/// Timing and accounting knobs for the polling engine.
#[derive(Debug, Clone)]
pub struct PollingEngineConfig {
    /// Idle delay between an inbound heartbeat and the response, in ms.
    pub idle_delay_ms: u64,
    /// Window after the inbound frame within which the response must go out.
    pub response_window_ms: u64,
    /// TX window handed to the driver for the response frame.
    pub tx_window_ms: u32,
    /// A heartbeat gap counts as uptime only when it is at most
    /// `time_interval × uptime_multiplier`.
    pub uptime_multiplier: u32,
    /// Accumulated-but-unflushed uptime that forces a counter flush.
    pub flush_threshold: Duration,
    /// Rolling METRICS window for voice-capable populations.
    pub metrics_window: Duration,
}

impl Default for PollingEngineConfig {
    fn default() -> Self {
        PollingEngineConfig {
            idle_delay_ms: 50,
            response_window_ms: 100,
            tx_window_ms: 100,
            uptime_multiplier: 2,
            flush_threshold: Duration::from_secs(3600),
            metrics_window: Duration::from_secs(24 * 3600),
        }
    }
}

// ============================================================================
// Action Queue
// ============================================================================

/// One action waiting to be delivered through a heartbeat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingAction {
    pub kind: PollingActionKind,
    pub payload: Vec<u8>,
}

impl PollingAction {
    pub fn new(kind: PollingActionKind) -> Self {
        PollingAction { kind, payload: Vec::new() }
    }

    /// Action with payload; payload is truncated to the wire cap.
    pub fn with_payload(kind: PollingActionKind, payload: Vec<u8>) -> Self {
        let mut payload = payload;
        payload.truncate(HEARTBEAT_PAYLOAD_MAX);
        PollingAction { kind, payload }
    }
}

/// Fixed precedence table: configuration and reset actions go out before
/// cosmetic ones. Lower value pops first.
pub fn action_priority(kind: PollingActionKind) -> u8 {
    match kind {
        PollingActionKind::Reboot => 0,
        PollingActionKind::Repair => 1,
        PollingActionKind::PollingConfiguration => 2,
        PollingActionKind::IrdbStatus => 3,
        PollingActionKind::KeyRotation => 4,
        PollingActionKind::Metrics => 5,
        PollingActionKind::Led => 6,
        PollingActionKind::NoAction => 7,
    }
}

#[derive(Debug)]
struct Queued {
    priority: u8,
    seq: u64,
    action: PollingAction,
}

impl Queued {
    fn key(&self) -> (u8, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Reversed so the max-heap pops the lowest (priority, seq): highest
    // precedence first, FIFO within a precedence class.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Per-controller priority queue of pending actions.
///
/// Survives across heartbeat exchanges until drained; a failed delivery is
/// requeued by the worker and goes out on the next heartbeat.
#[derive(Debug, Default)]
pub struct ActionQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: PollingAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued { priority: action_priority(action.kind), seq, action });
    }

    pub fn pop(&mut self) -> Option<PollingAction> {
        self.heap.pop().map(|q| q.action)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ============================================================================
// Uptime / Privacy Accounting
// ============================================================================

/// Running uptime and privacy-mode counters for one controller.
///
/// Time is accumulated in milliseconds from heartbeat gaps and flushed to
/// persistent storage in batches, not on every heartbeat.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UptimeCounters {
    uptime_ms: u64,
    privacy_ms: u64,
    unflushed_ms: u64,
}

impl UptimeCounters {
    pub const WIRE_LEN: usize = 16;

    pub fn uptime_secs(&self) -> u64 {
        self.uptime_ms / 1000
    }

    pub fn privacy_secs(&self) -> u64 {
        self.privacy_ms / 1000
    }

    /// Count a heartbeat gap. The gap is ignored when it exceeds
    /// `interval × multiplier` — a large gap after a reboot is not uptime.
    pub fn accumulate(
        &mut self,
        elapsed_ms: u64,
        interval_ms: u64,
        multiplier: u32,
        privacy_on: bool,
    ) {
        if interval_ms == 0 || elapsed_ms > interval_ms.saturating_mul(multiplier as u64) {
            debug!(elapsed_ms, interval_ms, "heartbeat gap outside expected period, not counted");
            return;
        }
        self.uptime_ms += elapsed_ms;
        self.unflushed_ms += elapsed_ms;
        if privacy_on {
            self.privacy_ms += elapsed_ms;
        }
    }

    /// Whether enough unflushed time accumulated to warrant a storage write.
    pub fn flush_due(&self, threshold: Duration) -> bool {
        self.unflushed_ms >= threshold.as_millis() as u64
    }

    pub fn mark_flushed(&mut self) {
        self.unflushed_ms = 0;
    }

    /// Persistent form: `uptime_ms(8, BE) privacy_ms(8, BE)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::WIRE_LEN);
        buf.extend_from_slice(&self.uptime_ms.to_be_bytes());
        buf.extend_from_slice(&self.privacy_ms.to_be_bytes());
        buf
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != Self::WIRE_LEN {
            return None;
        }
        let mut a = [0u8; 8];
        a.copy_from_slice(&raw[..8]);
        let mut b = [0u8; 8];
        b.copy_from_slice(&raw[8..]);
        Some(UptimeCounters {
            uptime_ms: u64::from_be_bytes(a),
            privacy_ms: u64::from_be_bytes(b),
            unflushed_ms: 0,
        })
    }
}

// ============================================================================
// Metrics Window
// ============================================================================

/// What to do with the rolling METRICS window right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsWindow {
    /// The window elapsed: enqueue METRICS actions and re-base the timestamp.
    Due,
    /// The persisted timestamp is in the future (clock stepped back):
    /// re-base to now and wait a full window.
    Rebase(Duration),
    /// Still inside the window; re-arm for the remainder.
    Wait(Duration),
}

/// Evaluate the rolling window against the persisted `time_metrics`
/// timestamp. Tolerant of wall-clock changes in both directions.
pub fn metrics_window(now_unix: u64, last_unix: Option<u64>, window: Duration) -> MetricsWindow {
    let window_secs = window.as_secs();
    match last_unix {
        None => MetricsWindow::Due,
        Some(last) if last > now_unix => MetricsWindow::Rebase(window),
        Some(last) if now_unix - last >= window_secs => MetricsWindow::Due,
        Some(last) => MetricsWindow::Wait(Duration::from_secs(window_secs - (now_unix - last))),
    }
}

// ============================================================================
// Heartbeat Handling
// ============================================================================

/// Result of processing one inbound heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatReply {
    pub response: HeartbeatResponse,
    /// The action delivered in this response, for in-flight tracking.
    pub delivered: Option<PollingAction>,
    /// A stale voice-session trigger was detected; tear the session down.
    pub terminate_voice: bool,
    /// Accumulated counters crossed the flush threshold.
    pub flush_counters: bool,
}

/// Stateless heartbeat processor; all per-remote state lives on the
/// [`Controller`].
pub struct PollingEngine {
    config: PollingEngineConfig,
}

impl PollingEngine {
    pub fn new(config: PollingEngineConfig) -> Self {
        PollingEngine { config }
    }

    pub fn config(&self) -> &PollingEngineConfig {
        &self.config
    }

    /// Process one heartbeat from `ctrl` received at `rx_time_ms`.
    ///
    /// `voice_streaming` is the pipeline's answer for this controller and is
    /// only consulted when the voice-session trigger bit is set.
    pub fn handle_heartbeat(
        &self,
        ctrl: &mut Controller,
        frame: &HeartbeatFrame,
        rx_time_ms: u64,
        now_unix: u64,
        voice_streaming: bool,
    ) -> HeartbeatReply {
        // An unvalidated controller only gets the link kept alive; this is
        // the path heartbeats take while ASB negotiation is outstanding.
        if !ctrl.is_validated() {
            return HeartbeatReply {
                response: HeartbeatResponse::no_action(),
                delivered: None,
                terminate_voice: false,
                flush_counters: false,
            };
        }

        let mut flush_counters = false;
        if ctrl.controller_type().voice_capable() {
            if let Some(last_ms) = ctrl.last_heartbeat_ms {
                let elapsed = rx_time_ms.saturating_sub(last_ms);
                let interval = self.configured_interval_ms(ctrl);
                let privacy_on = ctrl
                    .rib
                    .value(id::PRIVACY, 0)
                    .map(|v| v[0] != 0)
                    .unwrap_or(false);
                ctrl.uptime.accumulate(
                    elapsed,
                    interval,
                    self.config.uptime_multiplier,
                    privacy_on,
                );
                flush_counters = ctrl.uptime.flush_due(self.config.flush_threshold);
            }
        }
        ctrl.last_heartbeat_ms = Some(rx_time_ms);

        if frame.trigger & trigger::KEY_PRESS != 0 {
            ctrl.touch_key(now_unix);
        }

        // Special case: the remote thinks a voice session is running but
        // nothing is streaming. Tear the stale session down instead of
        // handing out the next queued action.
        if frame.trigger & trigger::VOICE_SESSION != 0 && !voice_streaming {
            return HeartbeatReply {
                response: HeartbeatResponse::no_action(),
                delivered: None,
                terminate_voice: true,
                flush_counters,
            };
        }

        let delivered = ctrl.actions.pop();
        let mut flags = response_flags::ACK;
        if !ctrl.actions.is_empty() {
            flags |= response_flags::POLL_AGAIN;
        }
        if ctrl.rib_updated {
            flags |= response_flags::RIB_PENDING;
            ctrl.rib_updated = false;
        }
        let response = match &delivered {
            Some(action) => HeartbeatResponse {
                flags,
                action: action.kind,
                payload: action.payload.clone(),
            },
            None => HeartbeatResponse { flags, action: PollingActionKind::NoAction, payload: Vec::new() },
        };

        HeartbeatReply { response, delivered, terminate_voice: false, flush_counters }
    }

    /// Expected heartbeat period from the controller's polling configuration.
    fn configured_interval_ms(&self, ctrl: &Controller) -> u64 {
        ctrl.rib
            .value(id::POLLING_CONFIGURATION, 0)
            .and_then(|v| PollingConfiguration::decode(v).ok())
            .map(|cfg| cfg.time_interval_ms as u64)
            .unwrap_or(0)
    }
}
