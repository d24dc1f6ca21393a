//! Error types for the mining server
//!
//! This module provides the error handling system using `thiserror`
//! for automatic error trait implementations with granular error categorization.

use std::time::Duration;
use thiserror::Error;

/// Configuration error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} (expected: {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Parse error in {file}: {message}")]
    ParseError { file: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationError { message: String },
}

/// Node RPC error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum RpcError {
    #[error("RPC error {code} from node: {message}")]
    Node { code: i64, message: String },

    #[error("RPC call {method} failed after {attempts} attempts: {message}")]
    Exhausted {
        method: String,
        attempts: u32,
        message: String,
    },

    #[error("Response parse error: {field} - {message}")]
    ResponseParse { field: String, message: String },

    #[error("Block rejected: {reason}")]
    BlockRejected { reason: String },
}

/// Wire protocol error subtypes (upstream Stratum and miner-facing framing)
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ProtocolError {
    #[error("Invalid message format: {message}")]
    InvalidFormat { message: String },

    #[error("Subscription failed: {reason}")]
    SubscribeFailed { reason: String },

    #[error("Authorization rejected: {reason}")]
    AuthorizeFailed { reason: String },

    #[error("Response parse error: {field} - {message}")]
    ResponseParse { field: String, message: String },

    #[error("Upstream disconnected")]
    Disconnected,
}

/// Data validation error subtypes
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("Invalid hex in {field}: {message}")]
    InvalidHex { field: String, message: String },

    #[error("Invalid length for {field}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Coinbase assembly failed: {message}")]
    Coinbase { message: String },

    #[error("No payout address configured")]
    NoPayoutAddress,
}

/// Main error type for the mining server
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Configuration errors with detailed context
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Node JSON-RPC errors
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Stratum wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Header/coinbase/share validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport errors (node RPC)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timeout errors with context
    #[error("Operation timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },

    /// Generic errors with context
    #[error("Error in {context}: {message}")]
    Other { context: String, message: String },
}

/// Result type alias for the mining server
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a generic configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::ValidationError {
            message: msg.into(),
        })
    }

    /// Create an invalid value configuration error
    pub fn config_invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        })
    }

    /// Create a missing field configuration error
    pub fn config_missing_field(field: impl Into<String>) -> Self {
        Self::Config(ConfigError::MissingField {
            field: field.into(),
        })
    }

    /// Create an invalid format protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidFormat {
            message: msg.into(),
        })
    }

    /// Create a response parse protocol error
    pub fn protocol_response_parse(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::ResponseParse {
            field: field.into(),
            message: msg.into(),
        })
    }

    /// Create an invalid hex validation error
    pub fn invalid_hex(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidHex {
            field: field.into(),
            message: msg.into(),
        })
    }

    /// Create an invalid length validation error
    pub fn invalid_length(field: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::Validation(ValidationError::InvalidLength {
            field: field.into(),
            expected,
            actual,
        })
    }

    /// Create a coinbase assembly error
    pub fn coinbase(msg: impl Into<String>) -> Self {
        Self::Validation(ValidationError::Coinbase {
            message: msg.into(),
        })
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Check if this error should trigger a retry of the failing call
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Io(_)
                | Error::Timeout { .. }
                | Error::Protocol(ProtocolError::Disconnected)
        )
    }

    /// Get the error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::Rpc(_) => "rpc",
            Error::Protocol(_) => "protocol",
            Error::Validation(_) => "validation",
            Error::Json(_) | Error::Yaml(_) => "serialization",
            Error::Io(_) => "io",
            Error::Http(_) => "http",
            Error::Timeout { .. } => "timeout",
            Error::Other { .. } => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing field");
        assert!(err.to_string().contains("Validation failed: missing field"));

        let err = Error::invalid_length("ntime", 4, 3);
        assert!(err
            .to_string()
            .contains("Invalid length for ntime: expected 4 bytes, got 3"));
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::config("test").category(), "configuration");
        assert_eq!(Error::protocol("test").category(), "protocol");
        assert_eq!(Error::coinbase("test").category(), "validation");
        assert_eq!(
            Error::timeout("submit", Duration::from_secs(10)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_should_retry() {
        assert!(Error::timeout("call", Duration::from_secs(5)).should_retry());
        assert!(!Error::config_missing_field("payout_address").should_retry());
    }
}
