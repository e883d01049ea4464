//! # Error Types
//!
//! Custom error types for Flightlog Replay using `thiserror`.
//!
//! Only fatal conditions are represented here. Malformed rows, unknown
//! columns and unmapped mode values are recovered where they occur and at
//! most mark the log entry as suspect.

use thiserror::Error;

/// Main error type for Flightlog Replay
#[derive(Debug, Error)]
pub enum FlightLogError {
    /// Input file could not be classified as any supported log format
    #[error("{0}: unknown log format")]
    UnknownFormat(String),

    /// File ends before its header is complete, or the header is unusable
    #[error("Truncated or corrupt log: {0}")]
    Truncated(String),

    /// Requested log entry does not exist in the source file
    #[error("No log entry with index {0}")]
    NoSuchEntry(usize),

    /// LTM protocol errors
    #[error("LTM protocol error: {0}")]
    LtmProtocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Mission file errors
    #[error("Mission error: {0}")]
    Mission(String),

    /// Elevation service failure (never fatal to the pipeline)
    #[error("Elevation lookup failed: {0}")]
    Elevation(String),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No usable serial device
    #[error("Serial port not found, tried: {0}")]
    SerialPortNotFound(String),

    /// Replay consumer went away before the producer finished
    #[error("Replay channel closed")]
    ChannelClosed,

    /// CSV reader errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Flightlog Replay
pub type Result<T> = std::result::Result<T, FlightLogError>;
