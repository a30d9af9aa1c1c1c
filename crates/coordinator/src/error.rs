//! Error types for the coordinator

use crate::config::ConfigError;
use hasivu_common::TransactionId;
use hasivu_database::DatabaseError;
use hasivu_lock::LockError;
use thiserror::Error;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Coordinator errors
///
/// Every failure of `execute_transaction` surfaces as one of these; the
/// coordinator never reports failure through a field on a successful result.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Every lock acquisition attempt failed; no transaction was started
    #[error("Failed to acquire lock {key} after {attempts} attempts")]
    LockAcquisitionFailed { key: String, attempts: u32 },

    /// The unit of work or the database failed with a non-retryable error
    #[error("Transaction {transaction_id} rolled back on attempt {attempts}")]
    Aborted {
        transaction_id: TransactionId,
        attempts: u32,
        deadlock_detected: bool,
        #[source]
        source: DatabaseError,
    },

    /// Retryable failures persisted through every allowed attempt
    #[error("Transaction {transaction_id} failed after {attempts} attempts")]
    RetriesExhausted {
        transaction_id: TransactionId,
        attempts: u32,
        deadlock_detected: bool,
        #[source]
        source: DatabaseError,
    },

    /// Lock store failure outside the acquisition loop
    #[error("Lock operation failed")]
    LockStore(#[from] LockError),

    #[error("Invalid coordinator configuration")]
    Config(#[from] ConfigError),
}

impl CoordinatorError {
    /// Whether the database transaction was rolled back
    pub fn rollback_occurred(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Aborted { .. } | CoordinatorError::RetriesExhausted { .. }
        )
    }

    /// Transaction attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            CoordinatorError::Aborted { attempts, .. }
            | CoordinatorError::RetriesExhausted { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    pub fn deadlock_detected(&self) -> bool {
        match self {
            CoordinatorError::Aborted {
                deadlock_detected, ..
            }
            | CoordinatorError::RetriesExhausted {
                deadlock_detected, ..
            } => *deadlock_detected,
            _ => false,
        }
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            CoordinatorError::Aborted { transaction_id, .. }
            | CoordinatorError::RetriesExhausted { transaction_id, .. } => Some(*transaction_id),
            _ => None,
        }
    }

    /// The last error raised by the database or unit of work
    pub fn database_error(&self) -> Option<&DatabaseError> {
        match self {
            CoordinatorError::Aborted { source, .. }
            | CoordinatorError::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Unwrap the caller's original error, unmodified
    pub fn into_database_error(self) -> Option<DatabaseError> {
        match self {
            CoordinatorError::Aborted { source, .. }
            | CoordinatorError::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hasivu_common::TransactionIdGenerator;

    #[test]
    fn test_lock_failure_has_no_transaction() {
        let err = CoordinatorError::LockAcquisitionFailed {
            key: "lock:order:1".into(),
            attempts: 3,
        };
        assert!(!err.rollback_occurred());
        assert_eq!(err.attempts(), 0);
        assert!(err.transaction_id().is_none());
        assert_eq!(err.to_string(), "Failed to acquire lock lock:order:1 after 3 attempts");
    }

    #[test]
    fn test_exhausted_names_transaction_and_attempts() {
        let id = TransactionIdGenerator::new().next_id();
        let err = CoordinatorError::RetriesExhausted {
            transaction_id: id,
            attempts: 4,
            deadlock_detected: true,
            source: DatabaseError::deadlock("deadlock detected"),
        };

        assert!(err.rollback_occurred());
        assert!(err.deadlock_detected());
        assert_eq!(err.attempts(), 4);
        assert_eq!(err.to_string(), format!("Transaction {id} failed after 4 attempts"));
        assert_eq!(
            std::error::Error::source(&err).map(|e| e.to_string()),
            Some("deadlock detected".to_string())
        );
        assert_eq!(err.into_database_error().unwrap().message(), "deadlock detected");
    }
}
