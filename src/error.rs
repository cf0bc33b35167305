//! Error types for the Tollgate limiter.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared store answered with something other than what was asked for
    #[error("Store error: {0}")]
    Store(String),

    /// A store call did not complete within the configured timeout
    #[error("Store call timed out after {0:?}")]
    StoreTimeout(Duration),

    /// Persisted bucket state could not be interpreted
    #[error("Corrupt state at key {key:?} (raw value {value:?}): {reason}")]
    CorruptState {
        key: String,
        value: String,
        reason: String,
    },

    /// Admission cost must be at least one token
    #[error("Invalid admission cost: {0}")]
    InvalidCost(u64),

    /// Redis client errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
