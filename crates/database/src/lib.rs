//! Transactional database handle contract
//!
//! The coordinator never talks to a driver directly. Adapters implement
//! [`Database`] and [`DatabaseTransaction`] and translate raw driver failures
//! into a [`DatabaseError`] tagged with an [`ErrorKind`] exactly once, at this
//! boundary.

mod error;
pub mod memory;

pub use error::{DatabaseError, ErrorKind, Result, classify};
pub use memory::{MemoryDatabase, MemoryDatabaseStats, MemoryTransaction};

use async_trait::async_trait;
use hasivu_common::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options handed to [`Database::begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginOptions {
    pub isolation_level: IsolationLevel,

    /// Upper bound for the transaction, enforced by the driver
    pub timeout: Duration,
}

impl Default for BeginOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// One edge of the lock-wait graph: `waiting` is blocked on `blocking`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockWait {
    pub waiting: u64,
    pub blocking: u64,
    pub resource: String,
}

/// A database that can open transactions
#[async_trait]
pub trait Database: Send + Sync {
    type Transaction: DatabaseTransaction;

    /// Open a transaction
    async fn begin(&self, options: BeginOptions) -> Result<Self::Transaction>;

    /// Current lock waits, for deadlock diagnostics.
    ///
    /// Drivers that cannot inspect lock state return an empty list.
    async fn lock_waits(&self) -> Result<Vec<LockWait>> {
        Ok(Vec::new())
    }
}

/// Scoped handle for issuing statements inside an open transaction
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a raw statement, returning the number of affected rows
    async fn execute(&mut self, statement: &str) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
