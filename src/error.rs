/// Unified error handling for portico
///
/// This module provides the error types shared by the node connection
/// pipeline, the pingers, the health checker and configuration loading.

use crate::proto::Protocol;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for portico operations
#[derive(Debug, Error)]
pub enum PorticoError {
    /// Transport errors (socket read/write/flush, read and write timeouts)
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operation attempted on a node connection after close
    #[error("Node connection closed: {cluster} {addr}")]
    ConnectionClosed { cluster: String, addr: String },

    /// Probe attempted on a pinger after close
    #[error("Pinger closed: {addr}")]
    PingerClosed { addr: String },

    /// A message carried a request for a different wire protocol
    #[error("Protocol mismatch: expected {expected} request, found {found}")]
    ProtocolMismatch { expected: Protocol, found: Protocol },

    /// Encode/decode failures of a single message
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Dial timeouts
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// The peer delivered fewer bytes than a fixed-size exchange requires
    #[error("Truncated read during {operation}: expected {expected} bytes, got {actual}")]
    Truncated {
        operation: String,
        expected: usize,
        actual: usize,
    },

    /// Probe response did not match the expected frame
    #[error("Ping failed: unexpected response from {addr}")]
    PingFailed { addr: String },
}

/// Codec-level errors raised while encoding a request or decoding a reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The bytes seen so far are valid but the frame is not complete yet.
    #[error("Incomplete data - need more bytes")]
    Incomplete,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Encode error: {0}")]
    Encode(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for portico operations
pub type PorticoResult<T> = Result<T, PorticoError>;

impl PorticoError {
    /// Create a node connection closed error
    pub fn connection_closed<S: Into<String>>(cluster: S, addr: S) -> Self {
        PorticoError::ConnectionClosed {
            cluster: cluster.into(),
            addr: addr.into(),
        }
    }

    /// Create a pinger closed error
    pub fn pinger_closed<S: Into<String>>(addr: S) -> Self {
        PorticoError::PingerClosed { addr: addr.into() }
    }

    /// Create a ping failure
    pub fn ping_failed<S: Into<String>>(addr: S) -> Self {
        PorticoError::PingFailed { addr: addr.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        PorticoError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a truncated read error
    pub fn truncated<S: Into<String>>(operation: S, expected: usize, actual: usize) -> Self {
        PorticoError::Truncated {
            operation: operation.into(),
            expected,
            actual,
        }
    }

    /// True for errors caused by using a closed connection or pinger
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            PorticoError::ConnectionClosed { .. } | PorticoError::PingerClosed { .. }
        )
    }

    /// Check if this error is recoverable by retrying on a fresh connection
    pub fn is_recoverable(&self) -> bool {
        match self {
            PorticoError::Network(_) => true,
            PorticoError::Timeout { .. } => true,
            PorticoError::Truncated { .. } => true,
            PorticoError::PingFailed { .. } => true,
            PorticoError::ConnectionClosed { .. } => true,
            PorticoError::PingerClosed { .. } => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PorticoError::Config(_) => ErrorSeverity::Critical,
            PorticoError::ProtocolMismatch { .. } => ErrorSeverity::Critical,
            PorticoError::Network(_) => ErrorSeverity::Warning,
            PorticoError::Timeout { .. } => ErrorSeverity::Warning,
            PorticoError::Truncated { .. } => ErrorSeverity::Warning,
            PorticoError::PingFailed { .. } => ErrorSeverity::Warning,
            PorticoError::ConnectionClosed { .. } => ErrorSeverity::Info,
            PorticoError::PingerClosed { .. } => ErrorSeverity::Info,
            PorticoError::Codec(_) => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

impl CodecError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        CodecError::InvalidFormat(message.into())
    }

    pub fn encode<S: Into<String>>(message: S) -> Self {
        CodecError::Encode(message.into())
    }

    /// True for the "need more bytes" signal
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = PorticoError::connection_closed("cache-a", "127.0.0.1:6379");
        assert!(matches!(error, PorticoError::ConnectionClosed { .. }));
        assert_eq!(
            error.to_string(),
            "Node connection closed: cache-a 127.0.0.1:6379"
        );
    }

    #[test]
    fn test_closed_classification() {
        assert!(PorticoError::connection_closed("c", "a").is_closed());
        assert!(PorticoError::pinger_closed("a").is_closed());
        assert!(!PorticoError::ping_failed("a").is_closed());
    }

    #[test]
    fn test_error_severity() {
        let config_error = PorticoError::Config(ConfigError::ValidationError("test".to_string()));
        assert_eq!(config_error.severity(), ErrorSeverity::Critical);

        let network_error =
            PorticoError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert_eq!(network_error.severity(), ErrorSeverity::Warning);

        let mismatch = PorticoError::ProtocolMismatch {
            expected: Protocol::Redis,
            found: Protocol::MemcacheBinary,
        };
        assert_eq!(mismatch.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_error_recoverability() {
        let network_error =
            PorticoError::Network(io::Error::new(io::ErrorKind::ConnectionRefused, "test"));
        assert!(network_error.is_recoverable());

        let codec_error = PorticoError::Codec(CodecError::invalid("bad"));
        assert!(!codec_error.is_recoverable());
    }

    #[test]
    fn test_codec_error_conversion() {
        let err: PorticoError = CodecError::Incomplete.into();
        assert!(matches!(err, PorticoError::Codec(CodecError::Incomplete)));
        assert!(CodecError::Incomplete.is_incomplete());
        assert!(!CodecError::encode("x").is_incomplete());
    }

    #[test]
    fn test_mismatch_display() {
        let err = PorticoError::ProtocolMismatch {
            expected: Protocol::MemcacheBinary,
            found: Protocol::Redis,
        };
        assert_eq!(
            err.to_string(),
            "Protocol mismatch: expected memcache_binary request, found redis"
        );
    }
}
