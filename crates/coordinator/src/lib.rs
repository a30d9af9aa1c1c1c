//! Transaction coordinator for the HASIVU backend
//!
//! Runs a caller-supplied unit of work inside a database transaction at a
//! chosen isolation level, optionally under a distributed lock, and retries
//! deadlocks and transient failures with capped exponential backoff.
//!
//! ```rust,ignore
//! let coordinator = TransactionCoordinator::new(database, Arc::new(MemoryLockStore::new()));
//!
//! let options = TransactionOptions::default()
//!     .with_isolation_level(IsolationLevel::Serializable)
//!     .with_distributed_lock(LockOptions::new("order:42:payment"));
//!
//! let result = coordinator
//!     .execute_transaction(options, |tx| {
//!         Box::pin(async move {
//!             tx.execute("UPDATE orders SET status = 'paid' WHERE id = 42").await
//!         })
//!     })
//!     .await?;
//! ```

mod config;
mod context;
mod coordinator;
mod deadlock;
mod error;
mod options;
mod result;
mod retry;
mod stats;

pub use config::{ConfigError, CoordinatorConfig};
pub use context::{
    ContextGuard, ContextRegistry, OperationMarker, TransactionContext, TransactionSummary,
};
pub use coordinator::TransactionCoordinator;
pub use deadlock::{DeadlockAnalysis, DeadlockAnalyzer, Recommendation, find_cycles};
pub use error::{CoordinatorError, Result};
pub use options::TransactionOptions;
pub use result::{TransactionMetrics, TransactionResult};
pub use retry::{AttemptOutcome, BackoffPolicy, RetryDecision, RetryPolicy, RetryReason};
pub use stats::CoordinatorStatsSnapshot;

// Re-export the collaborator types callers need alongside the coordinator
pub use hasivu_common::{IsolationLevel, TransactionId};
pub use hasivu_database::{Database, DatabaseError, DatabaseTransaction, ErrorKind};
pub use hasivu_lock::{
    DistributedLock, LockError, LockGuard, LockManager, LockOptions, LockStore, MIN_TTL,
    MemoryLockStore,
};
