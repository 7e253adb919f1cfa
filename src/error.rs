//! # Error Types
//!
//! Custom error types for Geodrive using `thiserror`.
//!
//! Command rejection by the rover is not an error: it comes back as a
//! [`CommandResult`](crate::protocol::command::CommandResult) with `success == false`.
//! Everything in [`GeodriveError`] is a fault the caller has to deal with.

use thiserror::Error;

/// Main error type for Geodrive
#[derive(Debug, Error)]
pub enum GeodriveError {
    /// Transport failures (connection lost, RPC failure, malformed response)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation attempted without an established connection
    #[error("Not connected to rover")]
    NotConnected,

    /// RC channel value outside the accepted range
    #[error("RC channel {channel} value {value} is out of range ({min}-{max})")]
    ChannelOutOfRange {
        channel: u8,
        value: u16,
        min: u16,
        max: u16,
    },

    /// RC channel number that does not exist
    #[error("Invalid RC channel number: {0} (must be 1-8)")]
    InvalidChannel(u8),

    /// RC stream ended after too many rejected updates in a row
    #[error("RC stream rejected: {0}")]
    StreamRejected(String),

    /// The streaming task or thread died abnormally
    #[error("RC stream task failed: {0}")]
    StreamTask(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Geodrive
pub type Result<T> = std::result::Result<T, GeodriveError>;
