//! Common types for the HASIVU transaction core
//!
//! This crate defines:
//! - Transaction IDs (wall clock + monotonic counter)
//! - Physical timestamps (microseconds since Unix epoch)
//! - Database isolation levels

mod isolation;
mod timestamp;
mod transaction_id;

pub use isolation::{IsolationLevel, ParseIsolationLevelError};
pub use timestamp::Timestamp;
pub use transaction_id::{TransactionId, TransactionIdGenerator};
