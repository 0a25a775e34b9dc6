//! Collaborator interfaces consumed by the RRC protocol engine.
//!
//! The engine never talks to hardware, crypto, persistent storage, or the
//! voice pipeline directly; it goes through the traits defined here:
//! - [`driver::HardwareDriver`] — radio pairing, frame transmission, and the
//!   hardware property interface
//! - [`crypto::CryptoModule`] — link-key derivation for the ASB handshake
//! - [`db::Database`] — blob-per-key persistent storage
//! - [`voice::VoiceSessionService`] — voice session admission decisions
//!
//! In-memory implementations for tests live in [`mock`] and [`db`]; a SQLite
//! database backend is available behind the `sqlite` feature.

#![forbid(unsafe_code)]

pub mod driver;
pub mod crypto;
pub mod db;
pub mod voice;
pub mod mock;

#[cfg(feature = "sqlite")]
pub mod sqlite;
