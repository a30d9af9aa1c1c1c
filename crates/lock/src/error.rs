//! Error types for lock stores

use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations
pub type Result<T> = std::result::Result<T, LockError>;

/// Lock store errors
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock store error: {0}")]
    Store(String),

    /// Leases shorter than a millisecond cannot be expressed by every store
    #[error("Lock TTL must be at least 1ms, got {0:?}")]
    InvalidTtl(Duration),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
