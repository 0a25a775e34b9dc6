//! Daemon configuration.
//!
//! Loaded from a TOML file, with environment overrides for the common knobs.
//! Every section is optional; absent values fall back to the engine defaults
//! so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rrc_core::asb::AsbConfig;
use rrc_core::blackout::BlackoutSettings;
use rrc_core::polling::PollingEngineConfig;
use rrc_core::types::NetworkId;
use rrc_core::NetworkConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub polling: PollingSection,
    pub blackout: BlackoutSection,
    pub asb: AsbSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Radio network this instance manages.
    pub network_id: u8,
    /// SQLite database path; in-memory when absent.
    pub db_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for DaemonSection {
    fn default() -> Self {
        DaemonSection { network_id: 0, db_path: None, log_level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    pub idle_delay_ms: u64,
    pub response_window_ms: u64,
    pub tx_window_ms: u32,
    pub uptime_multiplier: u32,
    pub flush_threshold_secs: u64,
    pub metrics_window_secs: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        let d = PollingEngineConfig::default();
        PollingSection {
            idle_delay_ms: d.idle_delay_ms,
            response_window_ms: d.response_window_ms,
            tx_window_ms: d.tx_window_ms,
            uptime_multiplier: d.uptime_multiplier,
            flush_threshold_secs: d.flush_threshold.as_secs(),
            metrics_window_secs: d.metrics_window.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackoutSection {
    pub fail_threshold: u32,
    pub blackout_time_secs: u64,
    pub reboot_threshold: u32,
    /// Pin the local values against runtime policy overrides.
    pub force_local: bool,
}

impl Default for BlackoutSection {
    fn default() -> Self {
        let d = BlackoutSettings::default();
        BlackoutSection {
            fail_threshold: d.fail_threshold,
            blackout_time_secs: d.blackout_time.as_secs(),
            reboot_threshold: d.reboot_threshold,
            force_local: d.force_local,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsbSection {
    pub blackout_time_secs: u64,
    pub response_wait_secs: u64,
    /// Derivation methods this network allows, as the wire bitmask.
    pub methods: u8,
}

impl Default for AsbSection {
    fn default() -> Self {
        let d = AsbConfig::default();
        AsbSection {
            blackout_time_secs: d.blackout_time.as_secs(),
            response_wait_secs: d.response_wait.as_secs(),
            methods: d.network_methods,
        }
    }
}

impl DaemonConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(e.to_string()))?;
        let config: DaemonConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("RRC_DB_PATH") {
            config.daemon.db_path = Some(PathBuf::from(path));
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            config.daemon.log_level = level;
        }
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.response_window_ms <= self.polling.idle_delay_ms {
            return Err(ConfigError::ValidationError(
                "polling.response_window_ms must exceed polling.idle_delay_ms".to_string(),
            ));
        }
        if self.blackout.fail_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "blackout.fail_threshold must be at least 1".to_string(),
            ));
        }
        if self.asb.methods == 0 {
            return Err(ConfigError::ValidationError(
                "asb.methods must have at least one bit set".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine configuration assembled from this file.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            id: NetworkId(self.daemon.network_id),
            polling: PollingEngineConfig {
                idle_delay_ms: self.polling.idle_delay_ms,
                response_window_ms: self.polling.response_window_ms,
                tx_window_ms: self.polling.tx_window_ms,
                uptime_multiplier: self.polling.uptime_multiplier,
                flush_threshold: Duration::from_secs(self.polling.flush_threshold_secs),
                metrics_window: Duration::from_secs(self.polling.metrics_window_secs),
            },
            blackout: BlackoutSettings {
                fail_threshold: self.blackout.fail_threshold,
                blackout_time: Duration::from_secs(self.blackout.blackout_time_secs),
                reboot_threshold: self.blackout.reboot_threshold,
                force_local: self.blackout.force_local,
            },
            asb: AsbConfig {
                blackout_time: Duration::from_secs(self.asb.blackout_time_secs),
                response_wait: Duration::from_secs(self.asb.response_wait_secs),
                network_methods: self.asb.methods,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_engine_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        let net = config.network_config();
        assert_eq!(net.polling.idle_delay_ms, 50);
        assert_eq!(net.polling.response_window_ms, 100);
        assert_eq!(net.blackout.fail_threshold, 3);
        assert_eq!(net.asb.network_methods, 0x01);
    }

    #[test]
    fn partial_sections_override_only_named_keys() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [blackout]
            fail_threshold = 5

            [polling]
            idle_delay_ms = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.blackout.fail_threshold, 5);
        assert_eq!(config.blackout.reboot_threshold, 5);
        assert_eq!(config.polling.idle_delay_ms, 40);
        assert_eq!(config.polling.response_window_ms, 100);
    }

    #[test]
    fn rejects_window_shorter_than_idle_delay() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [polling]
            idle_delay_ms = 100
            response_window_ms = 80
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }
}
