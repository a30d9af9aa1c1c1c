//! Distributed locks for cross-process mutual exclusion
//!
//! A lock is a key in a shared store holding a token unique to the acquiring
//! attempt. Acquisition is a single atomic set-if-absent with expiry; release
//! deletes the key only if it still holds the caller's token. The store's TTL
//! is authoritative, so a crashed holder never blocks others for longer than
//! the lease.

mod error;
mod guard;
mod manager;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

pub use error::{LockError, Result};
pub use guard::LockGuard;
pub use manager::{DistributedLock, LockManager, LockOptions, lock_key};
pub use memory::MemoryLockStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisLockStore;
pub use store::{LockStore, MIN_TTL, validate_ttl};
