//! In-memory database for tests and demos
//!
//! Keys map to JSON values. Writes are staged per transaction and applied on
//! commit; isolation is not simulated beyond that. Failures can be queued to
//! exercise the coordinator's retry paths.

use crate::{BeginOptions, Database, DatabaseError, DatabaseTransaction, LockWait, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what the database has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryDatabaseStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

#[derive(Default)]
struct Inner {
    data: Mutex<BTreeMap<String, Value>>,
    statements: Mutex<Vec<String>>,
    begin_failures: Mutex<VecDeque<DatabaseError>>,
    commit_failures: Mutex<VecDeque<DatabaseError>>,
    lock_waits: Mutex<Option<Result<Vec<LockWait>>>>,
    last_begin: Mutex<Option<BeginOptions>>,
    next_id: AtomicU64,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

/// In-memory database handle (cheap to clone)
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed value
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.inner.data.lock().insert(key.into(), value);
    }

    /// Read a committed value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.lock().get(key).cloned()
    }

    /// Every statement executed so far, across all transactions
    pub fn statements(&self) -> Vec<String> {
        self.inner.statements.lock().clone()
    }

    pub fn stats(&self) -> MemoryDatabaseStats {
        MemoryDatabaseStats {
            begun: self.inner.begun.load(Ordering::SeqCst),
            committed: self.inner.committed.load(Ordering::SeqCst),
            rolled_back: self.inner.rolled_back.load(Ordering::SeqCst),
        }
    }

    /// Options passed to the most recent `begin`
    pub fn last_begin_options(&self) -> Option<BeginOptions> {
        *self.inner.last_begin.lock()
    }

    /// Make the next `begin` call fail with `error`
    pub fn push_begin_failure(&self, error: DatabaseError) {
        self.inner.begin_failures.lock().push_back(error);
    }

    /// Make the next `commit` call fail with `error`
    pub fn push_commit_failure(&self, error: DatabaseError) {
        self.inner.commit_failures.lock().push_back(error);
    }

    /// Answer returned by `lock_waits` until replaced
    pub fn set_lock_waits(&self, waits: Result<Vec<LockWait>>) {
        *self.inner.lock_waits.lock() = Some(waits);
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Transaction = MemoryTransaction;

    async fn begin(&self, options: BeginOptions) -> Result<MemoryTransaction> {
        *self.inner.last_begin.lock() = Some(options);

        if let Some(error) = self.inner.begin_failures.lock().pop_front() {
            return Err(error);
        }

        self.inner.begun.fetch_add(1, Ordering::SeqCst);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(MemoryTransaction {
            id,
            options,
            inner: self.inner.clone(),
            writes: HashMap::new(),
            statements: Vec::new(),
            finished: false,
        })
    }

    async fn lock_waits(&self) -> Result<Vec<LockWait>> {
        self.inner
            .lock_waits
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Transaction over a [`MemoryDatabase`]
pub struct MemoryTransaction {
    id: u64,
    options: BeginOptions,
    inner: Arc<Inner>,
    /// Staged writes, `None` marks a delete
    writes: HashMap<String, Option<Value>>,
    statements: Vec<String>,
    finished: bool,
}

impl MemoryTransaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn options(&self) -> BeginOptions {
        self.options
    }

    /// Statements executed inside this transaction
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Read a value, seeing this transaction's own staged writes
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.writes.get(key) {
            Some(staged) => staged.clone(),
            None => self.inner.data.lock().get(key).cloned(),
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.writes.insert(key.into(), Some(value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.insert(key.into(), None);
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(DatabaseError::fatal(format!(
                "Transaction {} already finished",
                self.id
            )));
        }
        self.finished = true;
        Ok(())
    }
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &str) -> Result<u64> {
        if self.finished {
            return Err(DatabaseError::fatal(format!(
                "Transaction {} already finished",
                self.id
            )));
        }
        self.statements.push(statement.to_string());
        self.inner.statements.lock().push(statement.to_string());
        Ok(0)
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish()?;

        if let Some(error) = self.inner.commit_failures.lock().pop_front() {
            self.writes.clear();
            self.inner.rolled_back.fetch_add(1, Ordering::SeqCst);
            return Err(error);
        }

        let mut data = self.inner.data.lock();
        for (key, value) in self.writes.drain() {
            match value {
                Some(value) => data.insert(key, value),
                None => data.remove(&key),
            };
        }
        self.inner.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish()?;
        self.writes.clear();
        self.inner.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_applies_writes() {
        let db = MemoryDatabase::new();
        db.insert("balance:1", json!(10));

        let mut tx = db.begin(BeginOptions::default()).await.unwrap();
        tx.put("balance:1", json!(25));
        tx.put("order:1", json!("paid"));

        // Uncommitted writes are only visible inside the transaction
        assert_eq!(tx.get("balance:1"), Some(json!(25)));
        assert_eq!(db.get("balance:1"), Some(json!(10)));

        tx.commit().await.unwrap();
        assert_eq!(db.get("balance:1"), Some(json!(25)));
        assert_eq!(db.get("order:1"), Some(json!("paid")));
        assert_eq!(
            db.stats(),
            MemoryDatabaseStats {
                begun: 1,
                committed: 1,
                rolled_back: 0
            }
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = MemoryDatabase::new();
        db.insert("k", json!(1));

        let mut tx = db.begin(BeginOptions::default()).await.unwrap();
        tx.delete("k");
        assert_eq!(tx.get("k"), None);
        tx.rollback().await.unwrap();

        assert_eq!(db.get("k"), Some(json!(1)));
        assert_eq!(db.stats().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_finished_transaction_rejects_work() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin(BeginOptions::default()).await.unwrap();
        tx.commit().await.unwrap();

        assert!(tx.execute("SELECT 1").await.is_err());
        assert!(tx.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_queued_failures() {
        let db = MemoryDatabase::new();
        db.push_begin_failure(DatabaseError::transient("connection refused"));
        db.push_commit_failure(DatabaseError::deadlock("deadlock detected"));

        let err = db.begin(BeginOptions::default()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Transient);

        let mut tx = db.begin(BeginOptions::default()).await.unwrap();
        tx.put("k", json!(1));
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deadlock);
        assert_eq!(db.get("k"), None);

        // Queue drained
        let mut tx = db.begin(BeginOptions::default()).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_statement_log_and_begin_options() {
        let db = MemoryDatabase::new();
        let options = BeginOptions {
            isolation_level: hasivu_common::IsolationLevel::Serializable,
            timeout: std::time::Duration::from_millis(1_500),
        };

        let mut tx = db.begin(options).await.unwrap();
        tx.execute("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .await
            .unwrap();
        assert_eq!(tx.statements().len(), 1);
        assert_eq!(db.statements(), vec!["SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"]);
        assert_eq!(db.last_begin_options(), Some(options));
    }

    #[tokio::test]
    async fn test_lock_waits_default_and_override() {
        let db = MemoryDatabase::new();
        assert!(db.lock_waits().await.unwrap().is_empty());

        let wait = LockWait {
            waiting: 1,
            blocking: 2,
            resource: "orders".to_string(),
        };
        db.set_lock_waits(Ok(vec![wait.clone()]));
        assert_eq!(db.lock_waits().await.unwrap(), vec![wait]);

        db.set_lock_waits(Err(DatabaseError::fatal("permission denied for pg_locks")));
        assert!(db.lock_waits().await.is_err());
    }
}
