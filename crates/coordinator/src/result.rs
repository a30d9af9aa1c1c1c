//! Values returned from a successful transaction

use crate::deadlock::DeadlockAnalysis;
use hasivu_common::{Timestamp, TransactionId};
use std::time::Duration;

/// Extra timings collected when `TransactionOptions::metrics` is set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Time spent acquiring the distributed lock
    pub lock_wait: Duration,

    /// Wall time of each attempt, in order
    pub attempt_durations: Vec<Duration>,

    /// Total time spent sleeping between attempts
    pub backoff_total: Duration,

    /// Analysis from the most recent deadlock, if any
    pub deadlock_analysis: Option<DeadlockAnalysis>,
}

/// Outcome of a committed transaction
#[derive(Debug, Clone)]
pub struct TransactionResult<T> {
    /// Value produced by the unit of work
    pub data: T,
    pub transaction_id: TransactionId,
    pub duration: Duration,
    pub retry_count: u32,
    pub deadlock_detected: bool,
    pub lock_acquired: bool,
    pub rollback_occurred: bool,
    pub timestamp: Timestamp,
    pub metrics: Option<TransactionMetrics>,
}

impl<T> TransactionResult<T> {
    pub fn into_data(self) -> T {
        self.data
    }

    /// Total attempts made, including the successful one
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransactionResult<U> {
        TransactionResult {
            data: f(self.data),
            transaction_id: self.transaction_id,
            duration: self.duration,
            retry_count: self.retry_count,
            deadlock_detected: self.deadlock_detected,
            lock_acquired: self.lock_acquired,
            rollback_occurred: self.rollback_occurred,
            timestamp: self.timestamp,
            metrics: self.metrics,
        }
    }
}
