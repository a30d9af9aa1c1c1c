//! Lock manager that acquires, releases and tracks distributed locks
//!
//! The store is the source of truth. The manager keeps a local registry of the
//! locks this process believes it holds, for introspection and for the expiry
//! sweep.

use crate::error::Result;
use crate::guard::LockGuard;
use crate::store::{LockStore, validate_ttl};
use dashmap::DashMap;
use hasivu_common::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Namespaced store key for a resource
pub fn lock_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

/// How to acquire a lock on a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOptions {
    /// Resource name, stored under `lock:<key>`
    pub key: String,

    /// Lease length; the store drops the lock after this even without a release
    pub ttl: Duration,

    /// Fixed pause between acquisition attempts
    pub retry_delay: Duration,

    /// Total number of acquisition attempts
    pub max_retries: u32,
}

impl LockOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl: Duration::from_secs(30),
            retry_delay: Duration::from_millis(100),
            max_retries: 10,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attempts actually made; at least one
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Exclusive ownership of a named resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedLock {
    pub key: String,

    /// Proves ownership on release
    pub token: String,

    pub ttl: Duration,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl DistributedLock {
    fn new(key: String, token: String, ttl: Duration) -> Self {
        let acquired_at = Timestamp::now();
        Self {
            key,
            token,
            ttl,
            acquired_at,
            expires_at: acquired_at.add_duration(ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Timestamp::now()
    }
}

/// Token unique to one acquisition attempt: owner, random part, wall clock
fn generate_token(owner: &str) -> String {
    format!(
        "{}:{}:{}",
        owner,
        uuid::Uuid::new_v4().simple(),
        Timestamp::now().as_millis()
    )
}

/// Distributed lock manager
pub struct LockManager {
    store: Arc<dyn LockStore>,

    /// Locks held by this process, keyed by store key
    registry: Arc<DashMap<String, DistributedLock>>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            registry: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    /// Try to acquire the lock described by `options` on behalf of `owner`.
    ///
    /// Makes up to `options.max_retries` attempts with a fixed delay between
    /// them. Store errors count as failed attempts. Returns `None` once every
    /// attempt has failed, and an error without touching the store if
    /// `options.ttl` is below [`MIN_TTL`](crate::MIN_TTL).
    pub async fn acquire(
        &self,
        owner: &str,
        options: &LockOptions,
    ) -> Result<Option<DistributedLock>> {
        validate_ttl(options.ttl)?;
        let key = lock_key(&options.key);
        let attempts = options.attempts();

        for attempt in 1..=attempts {
            let token = generate_token(owner);

            match self.store.set_if_absent(&key, &token, options.ttl).await {
                Ok(true) => {
                    let lock = DistributedLock::new(key.clone(), token, options.ttl);
                    self.registry.insert(key.clone(), lock.clone());
                    tracing::info!(
                        lock_key = %key,
                        owner,
                        attempt,
                        ttl_ms = options.ttl.as_millis() as u64,
                        "Distributed lock acquired"
                    );
                    return Ok(Some(lock));
                }
                Ok(false) => {
                    tracing::debug!(lock_key = %key, owner, attempt, "Lock held by another owner");
                }
                Err(e) => {
                    tracing::warn!(lock_key = %key, owner, attempt, "Lock store error during acquire: {}", e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(options.retry_delay).await;
            }
        }

        tracing::warn!(lock_key = %key, owner, attempts, "Failed to acquire distributed lock");
        Ok(None)
    }

    /// Like [`acquire`](Self::acquire), but the lock is released when the
    /// returned guard is released or dropped.
    pub async fn acquire_guard(
        self: &Arc<Self>,
        owner: &str,
        options: &LockOptions,
    ) -> Result<Option<LockGuard>> {
        let lock = self.acquire(owner, options).await?;
        Ok(lock.map(|lock| LockGuard::new(self.clone(), lock)))
    }

    /// Release a lock if the store still holds its token.
    ///
    /// Returns `false` when the lock had already expired or been taken over by
    /// another holder; that holder's lock is left untouched. The local registry
    /// entry is dropped in every case.
    pub async fn release(&self, lock: &DistributedLock) -> Result<bool> {
        self.forget(lock);

        let released = self.store.compare_and_delete(&lock.key, &lock.token).await?;

        if released {
            tracing::info!(lock_key = %lock.key, "Distributed lock released");
        } else {
            tracing::warn!(
                lock_key = %lock.key,
                "Lock was not held by this token at release (expired or re-acquired)"
            );
        }

        Ok(released)
    }

    /// Extend a held lock's lease to `ttl` from now.
    ///
    /// Returns the updated lock, or `None` if the lock is no longer ours.
    pub async fn extend(&self, lock: &DistributedLock, ttl: Duration) -> Result<Option<DistributedLock>> {
        validate_ttl(ttl)?;
        if !self.store.compare_and_extend(&lock.key, &lock.token, ttl).await? {
            self.forget(lock);
            tracing::warn!(lock_key = %lock.key, "Cannot extend lock not held by this token");
            return Ok(None);
        }

        let now = Timestamp::now();
        let extended = DistributedLock {
            ttl,
            expires_at: now.add_duration(ttl),
            ..lock.clone()
        };
        self.registry.insert(extended.key.clone(), extended.clone());
        tracing::debug!(lock_key = %lock.key, ttl_ms = ttl.as_millis() as u64, "Distributed lock extended");

        Ok(Some(extended))
    }

    /// Locks this process currently believes it holds
    pub fn active_locks(&self) -> Vec<DistributedLock> {
        let mut locks: Vec<_> = self.registry.iter().map(|e| e.value().clone()).collect();
        locks.sort_by(|a, b| a.key.cmp(&b.key));
        locks
    }

    /// Whether `key` (already namespaced) is in the local registry
    pub fn is_registered(&self, key: &str) -> bool {
        self.registry.contains_key(key)
    }

    /// Drop the registry entry for `lock` without contacting the store
    pub(crate) fn forget(&self, lock: &DistributedLock) {
        self.registry
            .remove_if(&lock.key, |_, held| held.token == lock.token);
    }

    /// Drop registry entries whose lease has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.registry)
    }

    /// Start a background task that sweeps the registry every `interval`
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                sweep(&registry);
            }
        })
    }
}

fn sweep(registry: &DashMap<String, DistributedLock>) -> usize {
    let before = registry.len();
    registry.retain(|_, lock| !lock.is_expired());
    let removed = before.saturating_sub(registry.len());

    if removed > 0 {
        tracing::debug!(removed, "Swept expired lock registry entries");
    }
    removed
}
