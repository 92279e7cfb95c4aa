//! Error types for the SPDK manager
//!
//! Provides structured error types for the engine transport, the RPC
//! catalog, the device source collectors and the configuration layer.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Engine Transport Errors
    // =========================================================================
    #[error("SPDK socket unavailable: {socket} ({reason})")]
    TransportUnavailable { socket: String, reason: String },

    #[error("RPC request timeout for method: {method} (timeout: {}ms)", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    #[error("Unexpected RPC response for method {method}: expected id {expected}, received {received}")]
    UnexpectedResponse {
        method: String,
        expected: u64,
        received: String,
    },

    #[error("RPC protocol error for method {method}: {reason}")]
    Protocol { method: String, reason: String },

    #[error("RPC connection failed for method {method}: {source}")]
    Connection {
        method: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SPDK RPC Error: {message} (code {code})")]
    Engine { code: i64, message: String },

    // =========================================================================
    // Device Collection Errors
    // =========================================================================
    #[error("Collector {collector} failed: {reason}")]
    CollectorFailed { collector: String, reason: String },

    #[error("Command failed: {command} - {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Command timeout: {command} after {}ms", .timeout.as_millis())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Disk '{device}' not found")]
    DeviceNotFound { device: String },

    #[error("SMART data unavailable for device: {device}")]
    SmartUnavailable { device: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an error, used for metrics labels and
/// caller-side retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Socket missing or refusing connections
    TransportUnavailable,
    /// No response within the call window
    Timeout,
    /// Malformed, truncated or id-mismatched response
    Protocol,
    /// Application-level failure reported by the engine
    Engine,
    /// A device source could not be collected
    Collector,
    /// Everything else
    Other,
}

impl ErrorClass {
    /// Label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransportUnavailable => "unavailable",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Engine => "engine",
            ErrorClass::Collector => "collector",
            ErrorClass::Other => "other",
        }
    }
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::TransportUnavailable { .. } => ErrorClass::TransportUnavailable,
            Error::Timeout { .. } => ErrorClass::Timeout,
            Error::UnexpectedResponse { .. }
            | Error::Protocol { .. }
            | Error::Connection { .. } => ErrorClass::Protocol,
            Error::Engine { .. } => ErrorClass::Engine,
            Error::CollectorFailed { .. }
            | Error::CommandFailed { .. }
            | Error::CommandTimeout { .. } => ErrorClass::Collector,
            _ => ErrorClass::Other,
        }
    }

    /// Check if a caller may reasonably retry the operation.
    ///
    /// The transport itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::TransportUnavailable | ErrorClass::Timeout
        )
    }

    /// Engine error code, if the engine reported one
    pub fn engine_code(&self) -> Option<i64> {
        match self {
            Error::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for the manager
pub type Result<T> = std::result::Result<T, Error>;
