use std::path::Path;

use anyhow::{Context, Result};
use log::{info, LevelFilter};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_WRITE_QUEUE_WAIT_TIME_MS,
};
use crate::core::bluetooth::crypto::CryptoKey;
use crate::core::registry::{DeviceDescriptor, DeviceRegistry};

/// Verbosity of the gateway's log output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl LoggingConfig {
    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::Info)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

fn default_write_queue_wait_time() -> u64 {
    DEFAULT_WRITE_QUEUE_WAIT_TIME_MS
}

fn default_keep_alive() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Site key in hex, dashes allowed
    pub crypto_key: String,

    /// Devices installed on the site
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,

    /// Scan window and post-connect settle time, in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Pause between write queue passes, in milliseconds
    #[serde(default = "default_write_queue_wait_time")]
    pub write_queue_wait_time_ms: u64,

    /// Ping the mesh every few seconds and reconnect when it stops answering
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Loads the config from a JSON file.
    pub async fn load_config(path: &Path) -> Result<Self> {
        let file_path_str = path.to_string_lossy().into_owned();
        let config_json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", file_path_str))?;
        let config = Self::from_json(&config_json)?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid gateway config")?;
        config.crypto_key()?;
        Ok(config)
    }

    pub fn crypto_key(&self) -> Result<CryptoKey> {
        Ok(CryptoKey::from_hex(&self.crypto_key)?)
    }

    pub fn registry(&self) -> DeviceRegistry {
        DeviceRegistry::new(self.devices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config =
            GatewayConfig::from_json(r#"{ "crypto_key": "00112233-4455-6677-8899-aabbccddeeff" }"#)
                .unwrap();
        assert_eq!(config.connection_timeout_secs, 2);
        assert_eq!(config.write_queue_wait_time_ms, 400);
        assert!(config.keep_alive);
        assert!(config.devices.is_empty());
        assert_eq!(config.logging.level_filter(), LevelFilter::Info);
    }

    #[test]
    fn full_config_parses() {
        let config = GatewayConfig::from_json(
            r#"{
                "crypto_key": "00112233445566778899aabbccddeeff",
                "devices": [
                    { "id": 12, "serial_number": "F1A2B3C4D5E6", "name": "Kitchen", "dimmable": true }
                ],
                "connection_timeout_secs": 5,
                "write_queue_wait_time_ms": 100,
                "keep_alive": false,
                "logging": { "level": "trace" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.registry().get(12).map(|d| d.dimmable), Some(true));
        assert_eq!(config.connection_timeout_secs, 5);
        assert!(!config.keep_alive);
        assert_eq!(config.logging.level_filter(), LevelFilter::Trace);
        assert_eq!(config.crypto_key().unwrap().as_bytes()[15], 0xff);
    }

    #[test]
    fn bad_key_is_rejected() {
        assert!(GatewayConfig::from_json(r#"{ "crypto_key": "1234" }"#).is_err());
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let logging = LoggingConfig {
            level: "chatty".to_string(),
        };
        assert_eq!(logging.level_filter(), LevelFilter::Info);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = GatewayConfig::load_config(Path::new("/nonexistent/plejd.json")).await;
        assert!(err.is_err());
    }
}
