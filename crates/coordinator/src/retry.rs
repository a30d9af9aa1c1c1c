//! Retry classification and backoff
//!
//! Pure functions of the attempt number and the error kind. The coordinator's
//! loop only evaluates an [`AttemptOutcome`] and acts on it.

use hasivu_database::{DatabaseError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Capped exponential backoff: `min(base * 2^(retry - 1), cap)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the `retry`-th retry (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Why an attempt is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryReason {
    Deadlock,
    Transient,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::Deadlock => f.write_str("deadlock"),
            RetryReason::Transient => f.write_str("transient"),
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { reason: RetryReason, delay: Duration },
    /// Stop; `exhausted` when the error was retryable but no retries remain
    Abort { exhausted: bool },
}

/// Result of one transaction attempt after classification
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Committed(T),
    Retry {
        reason: RetryReason,
        delay: Duration,
        error: DatabaseError,
    },
    Fatal {
        error: DatabaseError,
        exhausted: bool,
    },
}

/// Backoff schedules per retry reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub deadlock: BackoffPolicy,
    pub transient: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            deadlock: BackoffPolicy::new(Duration::from_millis(1_000), Duration::from_millis(5_000)),
            transient: BackoffPolicy::new(Duration::from_millis(500), Duration::from_millis(2_000)),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, reason: RetryReason, retry: u32) -> Duration {
        match reason {
            RetryReason::Deadlock => self.deadlock.delay(retry),
            RetryReason::Transient => self.transient.delay(retry),
        }
    }

    /// Decide whether the `retry`-th retry should happen, given `retry_count`
    /// allowed retries.
    ///
    /// Deadlocks are only retryable while deadlock detection is enabled.
    pub fn decide(
        &self,
        kind: ErrorKind,
        deadlock_detection: bool,
        retry: u32,
        retry_count: u32,
    ) -> RetryDecision {
        let reason = match kind {
            ErrorKind::Deadlock if deadlock_detection => RetryReason::Deadlock,
            ErrorKind::Transient => RetryReason::Transient,
            _ => return RetryDecision::Abort { exhausted: false },
        };

        if retry > retry_count {
            return RetryDecision::Abort { exhausted: true };
        }

        RetryDecision::Retry {
            reason,
            delay: self.delay(reason, retry),
        }
    }

    /// Classify the result of an attempt
    pub fn evaluate<T>(
        &self,
        result: Result<T, DatabaseError>,
        deadlock_detection: bool,
        retry: u32,
        retry_count: u32,
    ) -> AttemptOutcome<T> {
        let error = match result {
            Ok(value) => return AttemptOutcome::Committed(value),
            Err(error) => error,
        };

        match self.decide(error.kind(), deadlock_detection, retry, retry_count) {
            RetryDecision::Retry { reason, delay } => AttemptOutcome::Retry {
                reason,
                delay,
                error,
            },
            RetryDecision::Abort { exhausted } => AttemptOutcome::Fatal { error, exhausted },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_deadlock_backoff_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=5).map(|k| policy.delay(RetryReason::Deadlock, k)).collect();
        assert_eq!(delays, vec![ms(1_000), ms(2_000), ms(4_000), ms(5_000), ms(5_000)]);
    }

    #[test]
    fn test_transient_backoff_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..=4).map(|k| policy.delay(RetryReason::Transient, k)).collect();
        assert_eq!(delays, vec![ms(500), ms(1_000), ms(2_000), ms(2_000)]);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = RetryPolicy::default();
        for reason in [RetryReason::Deadlock, RetryReason::Transient] {
            let mut previous = Duration::ZERO;
            for k in 1..=64 {
                let delay = policy.delay(reason, k);
                assert!(delay >= previous);
                assert!(delay <= ms(5_000));
                previous = delay;
            }
        }
    }

    #[test]
    fn test_huge_retry_numbers_do_not_overflow() {
        let policy = BackoffPolicy::new(ms(1_000), ms(5_000));
        assert_eq!(policy.delay(u32::MAX), ms(5_000));
        assert_eq!(policy.delay(0), ms(1_000));
    }

    #[test]
    fn test_decide_retryable_kinds() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.decide(ErrorKind::Deadlock, true, 1, 3),
            RetryDecision::Retry {
                reason: RetryReason::Deadlock,
                delay: ms(1_000)
            }
        );
        assert_eq!(
            policy.decide(ErrorKind::Transient, true, 2, 3),
            RetryDecision::Retry {
                reason: RetryReason::Transient,
                delay: ms(1_000)
            }
        );
    }

    #[test]
    fn test_decide_non_retryable_kinds() {
        let policy = RetryPolicy::default();
        for kind in [ErrorKind::Fatal, ErrorKind::Other] {
            assert_eq!(
                policy.decide(kind, true, 1, 3),
                RetryDecision::Abort { exhausted: false }
            );
        }
    }

    #[test]
    fn test_deadlock_without_detection_is_not_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(ErrorKind::Deadlock, false, 1, 3),
            RetryDecision::Abort { exhausted: false }
        );
        // Transient errors are retried either way
        assert!(matches!(
            policy.decide(ErrorKind::Transient, false, 1, 3),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_retry_bound() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.decide(ErrorKind::Transient, true, 3, 3),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            policy.decide(ErrorKind::Transient, true, 4, 3),
            RetryDecision::Abort { exhausted: true }
        );
        assert_eq!(
            policy.decide(ErrorKind::Deadlock, true, 1, 0),
            RetryDecision::Abort { exhausted: true }
        );
    }

    #[test]
    fn test_evaluate() {
        let policy = RetryPolicy::default();

        assert!(matches!(
            policy.evaluate(Ok::<_, DatabaseError>(7), true, 1, 3),
            AttemptOutcome::Committed(7)
        ));

        match policy.evaluate::<()>(Err(DatabaseError::deadlock("deadlock detected")), true, 1, 3) {
            AttemptOutcome::Retry { reason, delay, error } => {
                assert_eq!(reason, RetryReason::Deadlock);
                assert_eq!(delay, ms(1_000));
                assert_eq!(error.message(), "deadlock detected");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        match policy.evaluate::<()>(Err(DatabaseError::other("invalid menu item")), true, 1, 3) {
            AttemptOutcome::Fatal { error, exhausted } => {
                assert!(!exhausted);
                assert_eq!(error.message(), "invalid menu item");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
