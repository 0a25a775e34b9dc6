//! Voice session admission interface.
//!
//! Audio capture, streaming transports, and codecs are out of scope for the
//! engine; it only needs an admission decision when a remote asks to open a
//! voice session, and a liveness check so a stale "voice session active"
//! heartbeat trigger can be detected.

use async_trait::async_trait;

/// Admission decision for a voice session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDecision {
    /// Session accepted; the pipeline will drive audio from here.
    Accept,
    /// Session refused.
    Deny { reason: String },
}

/// Voice pipeline collaborator.
#[async_trait]
pub trait VoiceSessionService: Send + Sync {
    /// Ask the pipeline whether a session from this controller may start.
    async fn request(&self, controller_id: u8, audio_format: u8) -> SessionDecision;

    /// Whether this controller is currently streaming audio.
    async fn is_streaming(&self, controller_id: u8) -> bool;

    /// Tear down any session state for this controller (stale-trigger path).
    async fn terminate(&self, controller_id: u8);
}
