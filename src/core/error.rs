//! Error type and result alias.

use thiserror::Error;

/// Errors raised by codelens.
#[derive(Error, Debug)]
pub enum CodelensError {
    /// OTLP wire-level failure (bad routing, unsupported encoding).
    #[error("OTEL protocol error: {0}")]
    Protocol(String),

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener or connection failure.
    #[error("Network error: {0}")]
    Network(String),

    /// A trace or span identifier that is not valid hex.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Lookup miss surfaced to an API caller.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Body could not be decoded in the declared encoding.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Filesystem or socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// tonic transport failure while serving gRPC.
    #[error("GRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Background task panicked or was cancelled.
    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for codelens operations
pub type Result<T> = std::result::Result<T, CodelensError>;

impl CodelensError {
    /// Creates a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Decode(_) | Self::NotFound(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Config(_) => "config",
            Self::Network(_) | Self::Transport(_) => "network",
            Self::InvalidId(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Decode(_) | Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CodelensError::protocol("test message");
        assert_eq!(err.to_string(), "OTEL protocol error: test message");
        assert_eq!(err.category(), "protocol");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(CodelensError::network("connection reset").is_recoverable());
        assert!(CodelensError::decode("truncated body").is_recoverable());
        assert!(!CodelensError::config("https endpoint").is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err: CodelensError = io.into();
        assert_eq!(err.category(), "io");
        assert!(err.to_string().contains("busy"));
    }
}
