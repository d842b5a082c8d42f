//! Error types for the rate limiting core.

use std::time::Duration;
use thiserror::Error;

/// Main error type for rate limiting operations.
#[derive(Error, Debug)]
pub enum NotiError {
    /// Configuration-related errors (malformed rate strings, unreadable files)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The window store could not be reached
    #[error("Window store unavailable: {0}")]
    StoreUnavailable(String),

    /// A window store call exceeded its deadline
    #[error("Window store timed out after {0:?}")]
    StoreTimeout(Duration),

    /// Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NotiError {
    /// Whether this error means the backing store failed, as opposed to a
    /// caller or configuration mistake.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            NotiError::StoreUnavailable(_) | NotiError::StoreTimeout(_) | NotiError::Redis(_)
        )
    }
}

impl From<config::ConfigError> for NotiError {
    fn from(err: config::ConfigError) -> Self {
        NotiError::Config(err.to_string())
    }
}

/// Result type alias for rate limiting operations.
pub type Result<T> = std::result::Result<T, NotiError>;
