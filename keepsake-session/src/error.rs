//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Encryption or decryption failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Touch matched no live session
    #[error("Unable to find the session to touch: {0}")]
    TouchNotFound(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl SessionError {
    /// Check if this error means the backing store could not be reached.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            _ => false,
        }
    }

    /// Check if this error is a configuration problem detected at construction.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidUrl(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::TouchNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Unable to find the session to touch: abc");

        let err = SessionError::Crypto("tag mismatch".to_string());
        assert!(err.to_string().contains("tag mismatch"));
    }

    #[test]
    fn test_error_classification() {
        assert!(SessionError::Connection("down".into()).is_connection_error());
        assert!(!SessionError::Crypto("bad".into()).is_connection_error());
        assert!(SessionError::Config("missing".into()).is_config_error());
        assert!(SessionError::InvalidUrl("ftp://".into()).is_config_error());
    }
}
