// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads a TOML config file, deserializes the raw tables, and converts
//! humantime duration strings into typed intervals.

use crate::config::model::{
    BrokerConfig, Config, ConfigError, LoggingConfig, PollConfig, PollStub, WatchConfig,
};
use crate::volmgr_log;
use log::Level;
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

/// Raw mirror of the whole file; every table optional.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    broker: Option<BrokerConfig>,
    #[serde(default)]
    poll: PollStub,
    #[serde(default)]
    watch: Option<WatchConfig>,
}

/// Load and parse the configuration from `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    volmgr_log!(Level::Debug, "config", "reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let raw: RawConfig = toml::from_str(&txt)?;

    let defaults = PollConfig::default();
    let poll = PollConfig {
        encrypt_interval: parse_interval(raw.poll.encrypt_interval, defaults.encrypt_interval)?,
        decrypt_interval: parse_interval(raw.poll.decrypt_interval, defaults.decrypt_interval)?,
    };

    volmgr_log!(Level::Info, "config", "loaded config from {:?}", path);
    Ok(Config {
        logging: raw.logging,
        broker:  raw.broker.unwrap_or_default(),
        poll,
        watch:   raw.watch.unwrap_or_default(),
    })
}

/// Convert one optional humantime string into a duration.
fn parse_interval(raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(text) => humantime::parse_duration(&text)
            .map_err(|e| ConfigError::InvalidDuration(text, e)),
    }
}
