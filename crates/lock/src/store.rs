//! Lock store contract

use crate::error::{LockError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Shortest lease a lock may be taken or extended with
pub const MIN_TTL: Duration = Duration::from_millis(1);

/// Reject leases below [`MIN_TTL`]
pub fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl < MIN_TTL {
        return Err(LockError::InvalidTtl(ttl));
    }
    Ok(())
}

/// Key/value store offering the atomic primitives locks are built on.
///
/// Every method must complete in a single round trip to the store. Check-then-act
/// sequences spanning two calls are not acceptable implementations.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `token` with expiry `ttl` unless the key exists
    /// (`SET key token NX PX ttl`). Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it currently holds `token`. Returns whether a key was deleted.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool>;

    /// Reset the expiry of `key` to `ttl` only if it currently holds `token`.
    async fn compare_and_extend(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Current token stored at `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;
}
