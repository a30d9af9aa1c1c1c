//! Transaction identifiers
//!
//! An identifier is the wall-clock millisecond at creation plus a value from a
//! monotonic counter. It exists for log correlation only and is never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Transaction identifier rendered as `txn_<millis>_<sequence>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    timestamp_ms: u64,
    sequence: u64,
}

impl TransactionId {
    pub const fn new(timestamp_ms: u64, sequence: u64) -> Self {
        Self {
            timestamp_ms,
            sequence,
        }
    }

    /// Wall-clock millisecond the ID was generated at
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Counter value, unique per generator
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Result<Self, String> {
        let rest = s
            .strip_prefix("txn_")
            .ok_or_else(|| format!("Invalid transaction ID: {}", s))?;
        let (millis, sequence) = rest
            .split_once('_')
            .ok_or_else(|| format!("Invalid transaction ID: {}", s))?;

        let timestamp_ms = millis
            .parse()
            .map_err(|_| format!("Invalid timestamp component: {}", millis))?;
        let sequence = sequence
            .parse()
            .map_err(|_| format!("Invalid sequence component: {}", sequence))?;

        Ok(Self::new(timestamp_ms, sequence))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}_{}", self.timestamp_ms, self.sequence)
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp_ms
            .cmp(&other.timestamp_ms)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Generator for transaction IDs (thread-safe via atomics)
#[derive(Debug, Default)]
pub struct TransactionIdGenerator {
    counter: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next ID
    pub fn next_id(&self) -> TransactionId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        TransactionId::new(timestamp_ms, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_roundtrip() {
        let id = TransactionIdGenerator::new().next_id();
        let s = id.to_string();
        assert!(s.starts_with("txn_"));
        let parsed = TransactionId::parse(&s).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TransactionId::parse("abc").is_err());
        assert!(TransactionId::parse("txn_12").is_err());
        assert!(TransactionId::parse("txn_x_1").is_err());
        assert!(TransactionId::parse("txn_1_y").is_err());
    }

    #[test]
    fn test_generator_is_unique() {
        let generator = TransactionIdGenerator::new();
        let ids: HashSet<_> = (0..1_000).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let generator = TransactionIdGenerator::new();
        let a = generator.next_id();
        let b = generator.next_id();
        assert!(a.sequence() < b.sequence());
        assert!(a < b);
    }

    #[test]
    fn test_concurrent_generation() {
        use std::sync::Arc;

        let generator = Arc::new(TransactionIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..250).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 1_000);
    }
}
