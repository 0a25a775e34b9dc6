//! RRC Daemon - wires the control-plane engine to its collaborators.
//!
//! This crate provides:
//! - TOML configuration with environment overrides
//! - A simulated radio driver for development hosts
//! - The daemon entry point: storage selection, worker spawn, event logging

#![forbid(unsafe_code)]

pub mod config;
pub mod sim;

pub use config::{ConfigError, DaemonConfig};
pub use sim::SimDriver;
