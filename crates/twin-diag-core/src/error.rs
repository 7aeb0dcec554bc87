//! Error types for the diagnostic device client
//!
//! Transport failures are carried through unchanged. Nothing in here is
//! produced by twin-update validation: rejected diagnostic input is absorbed
//! and logged, never surfaced.

use thiserror::Error;

use crate::transport::TransportError;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum DiagError {
    /// Failure reported by the transport collaborator
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection string is missing a field or is malformed
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Invalid diagnostic configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// File access error while loading configuration
    #[error("File error: {0}")]
    Io(String),

    /// Configuration or twin document parsing error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl DiagError {
    /// Create a connection string error
    pub fn connection_string(msg: impl Into<String>) -> Self {
        DiagError::InvalidConnectionString(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        DiagError::Config(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        DiagError::Parse(msg.into())
    }

    /// Check if this error was caused by caller input rather than the transport
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DiagError::InvalidConnectionString(_)
                | DiagError::Config(_)
                | DiagError::Io(_)
                | DiagError::Parse(_)
        )
    }
}

impl From<std::io::Error> for DiagError {
    fn from(err: std::io::Error) -> Self {
        DiagError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DiagError {
    fn from(err: serde_json::Error) -> Self {
        DiagError::Parse(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for DiagError {
    fn from(err: toml::de::Error) -> Self {
        DiagError::Parse(format!("TOML error: {}", err))
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, DiagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiagError::Config("rate out of range".to_string());
        assert_eq!(err.to_string(), "Configuration error: rate out of range");
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: DiagError = TransportError::NotOpen.into();
        assert_eq!(err.to_string(), TransportError::NotOpen.to_string());
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_is_user_error() {
        assert!(DiagError::connection_string("missing DeviceId").is_user_error());
        assert!(DiagError::config("bad").is_user_error());
        assert!(DiagError::parse("bad").is_user_error());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DiagError = json_err.into();
        assert!(matches!(err, DiagError::Parse(_)));
        assert!(err.to_string().contains("JSON error"));
    }
}
