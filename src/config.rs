//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{GeodriveError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub rc_stream: RcStreamConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rover connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// RC stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RcStreamConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: u32,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// 0 disables the limit
    #[serde(default)]
    pub max_consecutive_rejections: u32,
}

/// Telemetry recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Application log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily rolling log file; console only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_host() -> String { "localhost".to_string() }
fn default_port() -> u16 { 5656 }
fn default_connect_timeout_ms() -> u64 { 5000 }

fn default_rate_hz() -> u32 { 20 }
fn default_stop_timeout_ms() -> u64 { 2000 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_log_format() -> String { "jsonl".to_string() }

fn default_log_level() -> String { "info".to_string() }

/// Accepted `[logging] level` values
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for RcStreamConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            stop_timeout_ms: default_stop_timeout_ms(),
            max_consecutive_rejections: 0,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            poll_interval_ms: default_poll_interval_ms(),
            format: default_log_format(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: None,
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> GeodriveError {
    GeodriveError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and keys fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use geodrive::config::Config;
    ///
    /// let config = Config::load("geodrive.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns [`GeodriveError::Config`] on a parse or validation failure.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Connection
        if self.connection.host.is_empty() {
            return Err(invalid("connection host cannot be empty"));
        }

        if self.connection.port == 0 {
            return Err(invalid("connection port must be non-zero"));
        }

        if self.connection.connect_timeout_ms == 0 || self.connection.connect_timeout_ms > 60000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 60000"));
        }

        // RC stream
        if !(10..=20).contains(&self.rc_stream.rate_hz) {
            return Err(invalid("rate_hz must be between 10 and 20"));
        }

        if self.rc_stream.stop_timeout_ms == 0 || self.rc_stream.stop_timeout_ms > 10000 {
            return Err(invalid("stop_timeout_ms must be between 1 and 10000"));
        }

        // Telemetry
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.poll_interval_ms == 0 || self.telemetry.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        // Logging
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "logging level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if matches!(&self.logging.file_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging file_dir cannot be empty when set"));
        }

        Ok(())
    }
}
