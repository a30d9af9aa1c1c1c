//! Per-call transaction options

use hasivu_common::IsolationLevel;
use hasivu_lock::LockOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for one `execute_transaction` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,

    /// Passed through to the driver when the transaction is opened
    pub timeout: Duration,

    /// Retries allowed after the first attempt
    pub retry_count: u32,

    /// Retry deadlocks and run deadlock diagnostics
    pub deadlock_detection: bool,

    /// Cross-process lock to hold for the whole call
    pub distributed_lock: Option<LockOptions>,

    /// Collect per-attempt timings into the result
    pub metrics: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::ReadCommitted,
            timeout: Duration::from_secs(30),
            retry_count: 3,
            deadlock_detection: true,
            distributed_lock: None,
            metrics: false,
        }
    }
}

impl TransactionOptions {
    pub fn with_isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    pub fn with_distributed_lock(mut self, lock: LockOptions) -> Self {
        self.distributed_lock = Some(lock);
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TransactionOptions::default();
        assert_eq!(options.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(options.retry_count, 3);
        assert!(options.deadlock_detection);
        assert!(options.distributed_lock.is_none());
        assert!(!options.metrics);
    }

    #[test]
    fn test_builders() {
        let options = TransactionOptions::default()
            .with_isolation_level(IsolationLevel::Serializable)
            .with_timeout(Duration::from_secs(5))
            .with_retry_count(0)
            .with_deadlock_detection(false)
            .with_distributed_lock(LockOptions::new("rfid:card:7"))
            .with_metrics(true);

        assert_eq!(options.isolation_level, IsolationLevel::Serializable);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.retry_count, 0);
        assert!(!options.deadlock_detection);
        assert_eq!(options.distributed_lock.unwrap().key, "rfid:card:7");
        assert!(options.metrics);
    }
}
