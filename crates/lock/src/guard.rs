//! Scoped ownership of an acquired lock

use crate::error::Result;
use crate::manager::{DistributedLock, LockManager};
use std::sync::Arc;

/// Releases its lock when released explicitly or dropped.
///
/// Dropping the guard (a cancelled future, a panic) spawns the release onto
/// the current tokio runtime. Without a runtime only the local registry entry
/// is cleared and the store entry expires by TTL.
pub struct LockGuard {
    manager: Arc<LockManager>,
    lock: DistributedLock,
    armed: bool,
}

impl LockGuard {
    pub(crate) fn new(manager: Arc<LockManager>, lock: DistributedLock) -> Self {
        Self {
            manager,
            lock,
            armed: true,
        }
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// Release now. Returns whether the store still held this lock's token.
    pub async fn release(mut self) -> Result<bool> {
        let released = self.manager.release(&self.lock).await;
        self.armed = false;
        released
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let lock = self.lock.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.manager.clone();
                tracing::debug!(lock_key = %lock.key, "Releasing dropped lock in background");
                handle.spawn(async move {
                    if let Err(e) = manager.release(&lock).await {
                        tracing::warn!(lock_key = %lock.key, "Failed to release dropped lock: {}", e);
                    }
                });
            }
            Err(_) => {
                self.manager.forget(&lock);
                tracing::warn!(
                    lock_key = %lock.key,
                    "Lock dropped outside a runtime, store entry left to expire"
                );
            }
        }
    }
}
