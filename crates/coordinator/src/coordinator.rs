//! Core coordinator implementation

use crate::config::CoordinatorConfig;
use crate::context::{ContextRegistry, TransactionContext, TransactionSummary};
use crate::deadlock::DeadlockAnalyzer;
use crate::error::{CoordinatorError, Result};
use crate::options::TransactionOptions;
use crate::result::{TransactionMetrics, TransactionResult};
use crate::retry::AttemptOutcome;
use crate::stats::{CoordinatorStats, CoordinatorStatsSnapshot};
use futures::future::BoxFuture;
use hasivu_common::{Timestamp, TransactionId, TransactionIdGenerator};
use hasivu_database::{BeginOptions, Database, DatabaseTransaction, ErrorKind};
use hasivu_lock::{DistributedLock, LockGuard, LockManager, LockOptions, LockStore, lock_key};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What a successful retry loop hands back to `execute_transaction`
struct Completed<T> {
    data: T,
    retries: u32,
    deadlock_detected: bool,
}

/// Runs units of work inside database transactions.
///
/// Construct one per process and share it by reference; every call gets its
/// own transaction ID and context.
pub struct TransactionCoordinator<D: Database> {
    database: D,

    /// Distributed locks and the local registry of held locks
    locks: Arc<LockManager>,

    /// Contexts of in-flight calls
    contexts: Arc<ContextRegistry>,

    ids: TransactionIdGenerator,
    config: CoordinatorConfig,
    stats: CoordinatorStats,

    /// Background lock registry sweep, if started
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Database> TransactionCoordinator<D> {
    pub fn new(database: D, lock_store: Arc<dyn LockStore>) -> Self {
        Self::with_config(database, lock_store, CoordinatorConfig::default())
    }

    pub fn with_config(
        database: D,
        lock_store: Arc<dyn LockStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            database,
            locks: Arc::new(LockManager::new(lock_store)),
            contexts: Arc::new(ContextRegistry::new()),
            ids: TransactionIdGenerator::new(),
            config,
            stats: CoordinatorStats::default(),
            sweeper: Mutex::new(None),
        }
    }

    /// Build a coordinator configured from `HASIVU_TX_*` variables
    pub fn from_env(database: D, lock_store: Arc<dyn LockStore>) -> Result<Self> {
        let config = CoordinatorConfig::from_env()?;
        Ok(Self::with_config(database, lock_store, config))
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Transactions currently inside `execute_transaction`
    pub fn active_transactions(&self) -> Vec<TransactionSummary> {
        self.contexts.summaries()
    }

    pub fn is_active(&self, transaction_id: &TransactionId) -> bool {
        self.contexts.contains(transaction_id)
    }

    /// Transaction options seeded from the coordinator's configuration
    pub fn options(&self) -> TransactionOptions {
        self.config.transaction_options()
    }

    /// Lock options for `key` seeded from the coordinator's configuration
    pub fn lock_options(&self, key: impl Into<String>) -> LockOptions {
        self.config.lock_options(key)
    }

    /// Run `work` inside a database transaction.
    ///
    /// Acquires the distributed lock first when `options.distributed_lock` is
    /// set; failing to get it aborts the call before any transaction is
    /// opened. Each attempt opens a transaction, sets the isolation level,
    /// runs `work` and commits. Deadlocks and transient failures are retried
    /// up to `options.retry_count` times with capped exponential backoff.
    /// The context is deregistered and the lock released on every path.
    pub async fn execute_transaction<T, F>(
        &self,
        options: TransactionOptions,
        work: F,
    ) -> Result<TransactionResult<T>>
    where
        T: Send,
        F: for<'t> Fn(&'t mut D::Transaction) -> BoxFuture<'t, hasivu_database::Result<T>>
            + Send
            + Sync,
    {
        let started = Instant::now();
        let transaction_id = self.ids.next_id();
        let guard = self.contexts.register(TransactionContext::new(
            transaction_id,
            options.isolation_level,
        ));
        self.stats.record_started();

        tracing::info!(
            %transaction_id,
            isolation_level = %options.isolation_level,
            retry_count = options.retry_count,
            lock_key = options.distributed_lock.as_ref().map(|l| l.key.as_str()),
            "Transaction started"
        );

        let mut metrics = TransactionMetrics::default();

        let lock = match &options.distributed_lock {
            Some(lock_options) => {
                let lock_started = Instant::now();
                let acquired = self
                    .locks
                    .acquire_guard(&transaction_id.to_string(), lock_options)
                    .await?;
                metrics.lock_wait = lock_started.elapsed();

                match acquired {
                    Some(lock) => {
                        self.contexts.add_lock(transaction_id, lock.lock().clone());
                        Some(lock)
                    }
                    None => {
                        drop(guard);
                        self.stats.record_lock_failure();

                        let key = lock_key(&lock_options.key);
                        tracing::error!(
                            %transaction_id,
                            lock_key = %key,
                            "Transaction not started: lock unavailable"
                        );
                        return Err(CoordinatorError::LockAcquisitionFailed {
                            key,
                            attempts: lock_options.attempts(),
                        });
                    }
                }
            }
            None => None,
        };

        let outcome = self
            .run_with_retries(transaction_id, &options, &work, &mut metrics)
            .await;

        let lock_acquired = lock.is_some();
        guard.deregister();
        if let Some(lock) = lock {
            release_lock(lock).await;
        }
        tracing::info!(
            %transaction_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transaction cleanup completed"
        );

        let completed = outcome?;

        Ok(TransactionResult {
            data: completed.data,
            transaction_id,
            duration: started.elapsed(),
            retry_count: completed.retries,
            deadlock_detected: completed.deadlock_detected,
            lock_acquired,
            rollback_occurred: false,
            timestamp: Timestamp::now(),
            metrics: options.metrics.then_some(metrics),
        })
    }

    /// Run `work` while holding a distributed lock, without a database
    /// transaction. The lock is released however `work` completes, including
    /// when it panics or the returned future is dropped.
    pub async fn execute_with_lock<T, Fut>(&self, options: &LockOptions, work: Fut) -> Result<T>
    where
        Fut: Future<Output = T>,
    {
        let owner = self.ids.next_id().to_string();

        let Some(lock) = self.locks.acquire_guard(&owner, options).await? else {
            self.stats.record_lock_failure();
            return Err(CoordinatorError::LockAcquisitionFailed {
                key: lock_key(&options.key),
                attempts: options.attempts(),
            });
        };

        let output = work.await;
        release_lock(lock).await;

        Ok(output)
    }

    /// Extend a lock held by this coordinator. `None` if it is no longer ours.
    pub async fn extend_lock(
        &self,
        lock: &DistributedLock,
        ttl: Duration,
    ) -> Result<Option<DistributedLock>> {
        Ok(self.locks.extend(lock, ttl).await?)
    }

    /// Start sweeping expired entries from the lock registry every
    /// `config.lock_sweep_interval`. Does nothing if already running.
    pub fn start_lock_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        *sweeper = Some(self.locks.spawn_sweeper(self.config.lock_sweep_interval));
        tracing::info!(
            interval_ms = self.config.lock_sweep_interval.as_millis() as u64,
            "Lock registry sweeper started"
        );
    }

    pub fn is_sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop background work
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancelled is the expected outcome
            let _ = handle.await;
        }

        tracing::info!(
            active_transactions = self.contexts.len(),
            held_locks = self.locks.active_locks().len(),
            "Transaction coordinator stopped"
        );
    }

    async fn run_with_retries<T, F>(
        &self,
        transaction_id: TransactionId,
        options: &TransactionOptions,
        work: &F,
        metrics: &mut TransactionMetrics,
    ) -> Result<Completed<T>>
    where
        T: Send,
        F: for<'t> Fn(&'t mut D::Transaction) -> BoxFuture<'t, hasivu_database::Result<T>>
            + Send
            + Sync,
    {
        let mut retries = 0;
        let mut deadlock_detected = false;

        loop {
            let attempt = retries + 1;
            let attempt_started = Instant::now();
            let result = self
                .run_attempt(transaction_id, attempt, options, work)
                .await;
            metrics.attempt_durations.push(attempt_started.elapsed());

            if let Err(error) = &result
                && error.kind() == ErrorKind::Deadlock
                && options.deadlock_detection
            {
                deadlock_detected = true;
                self.stats.record_deadlock();

                let analysis = DeadlockAnalyzer::analyze(&self.database).await;
                tracing::warn!(
                    %transaction_id,
                    attempt,
                    cycles = analysis.cycles.len(),
                    recommendation = ?analysis.recommendation,
                    "Deadlock detected"
                );
                metrics.deadlock_analysis = Some(analysis);
            }

            let outcome = self.config.retry_policy.evaluate(
                result,
                options.deadlock_detection,
                attempt,
                options.retry_count,
            );

            match outcome {
                AttemptOutcome::Committed(data) => {
                    self.stats.record_committed();
                    tracing::info!(%transaction_id, attempts = attempt, "Transaction committed");

                    return Ok(Completed {
                        data,
                        retries,
                        deadlock_detected,
                    });
                }
                AttemptOutcome::Retry {
                    reason,
                    delay,
                    error,
                } => {
                    retries += 1;
                    self.stats.record_retry();
                    self.contexts
                        .record(transaction_id, attempt, format!("retry_scheduled:{reason}"));
                    tracing::warn!(
                        %transaction_id,
                        attempt,
                        %reason,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying transaction: {}",
                        error
                    );

                    tokio::time::sleep(delay).await;
                    metrics.backoff_total += delay;
                }
                AttemptOutcome::Fatal { error, exhausted } => {
                    self.stats.record_failed();
                    tracing::error!(
                        %transaction_id,
                        attempts = attempt,
                        exhausted,
                        kind = %error.kind(),
                        "Transaction rolled back: {}",
                        error
                    );

                    return Err(if exhausted {
                        CoordinatorError::RetriesExhausted {
                            transaction_id,
                            attempts: attempt,
                            deadlock_detected,
                            source: error,
                        }
                    } else {
                        CoordinatorError::Aborted {
                            transaction_id,
                            attempts: attempt,
                            deadlock_detected,
                            source: error,
                        }
                    });
                }
            }
        }
    }

    async fn run_attempt<T, F>(
        &self,
        transaction_id: TransactionId,
        attempt: u32,
        options: &TransactionOptions,
        work: &F,
    ) -> hasivu_database::Result<T>
    where
        T: Send,
        F: for<'t> Fn(&'t mut D::Transaction) -> BoxFuture<'t, hasivu_database::Result<T>>
            + Send
            + Sync,
    {
        let mut tx = self
            .database
            .begin(BeginOptions {
                isolation_level: options.isolation_level,
                timeout: options.timeout,
            })
            .await?;

        let result = match tx.execute(&options.isolation_level.set_statement()).await {
            Ok(_) => work(&mut tx).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(data) => {
                self.contexts
                    .record(transaction_id, attempt, "unit_of_work_completed");
                tx.commit().await?;
                self.contexts.record(transaction_id, attempt, "committed");
                Ok(data)
            }
            Err(error) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(%transaction_id, attempt, "Rollback failed: {}", e);
                }
                Err(error)
            }
        }
    }
}

async fn release_lock(lock: LockGuard) {
    let key = lock.lock().key.clone();
    if let Err(e) = lock.release().await {
        tracing::warn!(lock_key = %key, "Failed to release distributed lock: {}", e);
    }
}

impl<D: Database> Drop for TransactionCoordinator<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
