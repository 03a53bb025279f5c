//! Error types for the Tapo exporter.
//!
//! This module defines custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

/// Main error type for Tapo exporter operations.
#[derive(Debug, Error)]
pub enum TapoError {
    /// Error talking HTTP to a device
    #[error("Device HTTP error: {0}")]
    Api(#[from] reqwest::Error),

    /// Device answered with a non-zero error code
    #[error("Device returned error code {code} for {method}")]
    Device { method: String, code: i64 },

    /// Device answered with a status that is neither success nor an HTTP error
    #[error("Unexpected HTTP status {status} for {method}")]
    UnexpectedStatus { method: String, status: u16 },

    /// Error parsing a device response
    #[error("Failed to parse device response: {0}")]
    ParseError(String),

    /// Could not set up a session for a configured device
    #[error("Cannot connect to device {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Metrics error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// HTTP server error
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tapo exporter operations.
pub type Result<T> = std::result::Result<T, TapoError>;
