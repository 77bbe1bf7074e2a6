//! Error types for the settings layer.
//!
//! Data item operations never fail: backend problems are absorbed and the
//! item falls back to its default. Errors only surface where a caller can
//! act on them: opening a backend, loading configuration, validating keys
//! and the bounded edit wait.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while setting up or driving the settings layer.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Storage key is empty or too long for the backing namespace.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Cannot open or communicate with the storage backend.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Configuration is inconsistent or incomplete.
    #[error("config error: {0}")]
    ConfigError(String),

    /// The exclusive edit token could not be acquired in time.
    #[error("edit of {item} timed out after {timeout:?}")]
    EditTimeout { item: String, timeout: Duration },

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

impl SettingsError {
    /// Returns true if the failed operation may succeed when tried again.
    ///
    /// Nothing in this crate retries on its own; this is a hint for the
    /// application.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettingsError::EditTimeout { .. } | SettingsError::ConnectionError(_)
        )
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(err: serde_json::Error) -> Self {
        SettingsError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SettingsError::InvalidKey("a_key_that_is_too_long".to_string());
        assert!(err.to_string().contains("invalid key"));
        assert!(err.to_string().contains("a_key_that_is_too_long"));
    }

    #[test]
    fn test_edit_timeout_display() {
        let err = SettingsError::EditTimeout {
            item: "brightness".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert!(err.to_string().contains("brightness"));
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SettingsError::EditTimeout {
            item: "x".to_string(),
            timeout: Duration::from_millis(1),
        }
        .is_retryable());
        assert!(SettingsError::ConnectionError("test".to_string()).is_retryable());
        assert!(!SettingsError::InvalidKey("test".to_string()).is_retryable());
        assert!(!SettingsError::ConfigError("test".to_string()).is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let err: SettingsError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, SettingsError::SerializationError(_)));
    }
}
