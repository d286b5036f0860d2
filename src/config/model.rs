// src/config/model.rs

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Top-level runtime config
#[derive(Debug)]
pub struct Config {
    pub logging: LoggingConfig,
    pub broker:  BrokerConfig,
    pub poll:    PollConfig,
    pub watch:   WatchConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]            pub enable: bool,
    #[serde(default)]            pub file:   Option<String>,
    #[serde(default = "default_level")] pub level: String,
}
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { enable: false, file: None, level: default_level() }
    }
}

/// Mirror of the `[broker]` table: namespace paths the connection targets.
/// A connection is established once per component lifetime; one failed
/// connect disables the component until re-initialized.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_encryption_namespace")]
    pub encryption_namespace: String,
    #[serde(default = "default_device_namespace")]
    pub device_namespace: String,
}
fn default_encryption_namespace() -> String {
    r"\\.\root\cimv2\Security\MicrosoftVolumeEncryption".into()
}
fn default_device_namespace() -> String { r"\\.\root\cimv2".into() }

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            encryption_namespace: default_encryption_namespace(),
            device_namespace:     default_device_namespace(),
        }
    }
}

/// Holds the raw `[poll]` entries from TOML (durations as humantime strings)
#[derive(Debug, Default, Deserialize)]
pub struct PollStub {
    #[serde(default)] pub encrypt_interval: Option<String>,
    #[serde(default)] pub decrypt_interval: Option<String>,
}

/// Fully-typed poll intervals for conversion-status loops
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub encrypt_interval: Duration,
    pub decrypt_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            encrypt_interval: Duration::from_millis(500),
            decrypt_interval: Duration::from_millis(200),
        }
    }
}

/// Mirror of the `[watch]` table
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}
fn default_queue_capacity() -> usize { crate::watch::DEFAULT_QUEUE_CAPACITY }

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig { queue_capacity: default_queue_capacity() }
    }
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
