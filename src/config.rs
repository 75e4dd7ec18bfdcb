use std::env;
use std::path::PathBuf;
use std::time::Duration;
use log::{info, warn};

use crate::errors::ConfigError;

// Server Configuration
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_FRONTEND_DIR: &str = "./frontend";
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

// Upstream Configuration
pub const API_KEY_VAR: &str = "COINDESK_API_KEY";
pub const API_URL_VAR: &str = "COINDESK_API_URL";
pub const DEFAULT_INSTRUMENT: &str = "BTC-USD";
pub const FETCH_TIMEOUT_SECS: u64 = 3;

// Broadcast Configuration
pub const SAMPLE_INTERVAL_SECS: u64 = 5;
pub const HISTORY_RETENTION_SECS: u64 = 300;
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 1;

pub struct Config {
    pub api_key: String,
    pub api_url: String,
    pub instrument: String,
    pub bind_address: String,
    pub frontend_dir: PathBuf,
    pub log_level: String,
    pub sample_interval: Duration,
    pub history_retention: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| present(name).ok_or(ConfigError::MissingVar(name));
        let optional = |name: &str, default: &str| present(name).unwrap_or_else(|| default.to_string());

        Ok(Self {
            api_key: required(API_KEY_VAR)?,
            api_url: required(API_URL_VAR)?,
            instrument: optional("COINDESK_INSTRUMENT", DEFAULT_INSTRUMENT),
            bind_address: optional("BIND_ADDRESS", DEFAULT_BIND_ADDRESS),
            frontend_dir: PathBuf::from(optional("FRONTEND_DIR", DEFAULT_FRONTEND_DIR)),
            log_level: optional("RUST_LOG", "info"),
            sample_interval: Duration::from_secs(SAMPLE_INTERVAL_SECS),
            history_retention: Duration::from_secs(HISTORY_RETENTION_SECS),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "sample_interval",
                reason: "must be greater than zero".to_string(),
            });
        }

        if !self.api_url.contains("%s") && !self.api_url.contains("{api_key}") {
            warn!("{} has no API key placeholder, key will not be sent", API_URL_VAR);
        }

        if !self.frontend_dir.is_dir() {
            warn!("Frontend directory not found: {}", self.frontend_dir.display());
        }

        Ok(())
    }

    /// Number of samples the history buffer keeps: one retention window's worth.
    pub fn history_capacity(&self) -> usize {
        let interval = self.sample_interval.as_secs_f64();
        if interval <= 0.0 {
            return 0;
        }
        (self.history_retention.as_secs_f64() / interval).ceil() as usize
    }

    pub fn log_config(&self) {
        info!("Server Configuration:");
        info!("  Bind Address: {}", self.bind_address);
        info!("  Frontend Dir: {}", self.frontend_dir.display());
        info!("  Instrument: {}", self.instrument);
        info!("  Sample Interval: {:?}", self.sample_interval);
        info!("  History: {} samples over {:?}", self.history_capacity(), self.history_retention);
        info!("  Log Level: {}", self.log_level);
        info!("  API Key: {}", self.masked_api_key());
    }

    /// First four characters of the key, or nothing when the key is that short.
    fn masked_api_key(&self) -> String {
        const VISIBLE: usize = 4;
        if self.api_key.chars().count() <= VISIBLE {
            return "***".to_string();
        }
        let visible: String = self.api_key.chars().take(VISIBLE).collect();
        format!("{}***", visible)
    }
}
