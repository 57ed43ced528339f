//! Monitor configuration
//!
//! Stored as JSON; every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::poller::PollerConfig;
use crate::protocol::{LinkConfig, DEFAULT_BAUD_RATE, DEFAULT_PORT};
use crate::store::DEFAULT_HISTORY_LENGTH;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON for this config
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value failed validation
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqmConfig {
    /// Serial device path
    pub port: String,
    /// Serial baud rate (115200 for SQM-LU, 4800 for older units)
    pub baud_rate: u32,
    /// Reply timeout
    pub timeout_seconds: f64,
    /// Time between readings
    pub poll_interval_seconds: f64,
    /// Keep at most this many records in memory
    pub retention_capacity: Option<usize>,
    /// Append-only record log
    pub log_file: Option<String>,
    /// Consecutive link failures before polling halts
    pub max_reconnect_attempts: u32,
    /// First reconnect delay, doubled after each further failure
    pub reconnect_base_delay_seconds: f64,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay_seconds: f64,
    /// Period of the window averages
    pub average_interval_seconds: u64,
    /// Number of window averages kept
    pub average_history: usize,
}

impl Default for SqmConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_seconds: 2.0,
            poll_interval_seconds: 5.0,
            retention_capacity: None,
            log_file: None,
            max_reconnect_attempts: 10,
            reconnect_base_delay_seconds: 1.0,
            reconnect_max_delay_seconds: 900.0,
            average_interval_seconds: 300,
            average_history: DEFAULT_HISTORY_LENGTH,
        }
    }
}

impl SqmConfig {
    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: SqmConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::Invalid("port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".into()));
        }
        for (name, value) in [
            ("timeout_seconds", self.timeout_seconds),
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("reconnect_base_delay_seconds", self.reconnect_base_delay_seconds),
            ("reconnect_max_delay_seconds", self.reconnect_max_delay_seconds),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if self.retention_capacity == Some(0) {
            return Err(ConfigError::Invalid("retention_capacity must be at least 1".into()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid("max_reconnect_attempts must be at least 1".into()));
        }
        if self.average_interval_seconds == 0 {
            return Err(ConfigError::Invalid("average_interval_seconds must be positive".into()));
        }
        Ok(())
    }

    /// Serial link settings
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            port_name: self.port.clone(),
            baud_rate: self.baud_rate,
            timeout_ms: (self.timeout_seconds * 1000.0).round() as u64,
        }
    }

    /// Poller timing
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs_f64(self.poll_interval_seconds),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_secs_f64(self.reconnect_base_delay_seconds),
            reconnect_max_delay: Duration::from_secs_f64(self.reconnect_max_delay_seconds),
        }
    }

    /// Length of one averaging window
    pub fn average_interval(&self) -> Duration {
        Duration::from_secs(self.average_interval_seconds)
    }
}
