//! Physical wall-clock timestamps

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        Self(micros)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Timestamp shifted forward by `duration`
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_micros() as u64))
    }

    /// Microseconds elapsed since `earlier`, zero if `earlier` is in the future
    pub fn duration_since(&self, earlier: &Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_duration() {
        let ts = Timestamp::from_micros(1_000);
        let later = ts.add_duration(Duration::from_millis(5));
        assert_eq!(later.as_micros(), 6_000);
        assert_eq!(later.duration_since(&ts), 5_000);
    }

    #[test]
    fn test_duration_since_saturates() {
        let early = Timestamp::from_micros(10);
        let late = Timestamp::from_micros(20);
        assert_eq!(early.duration_since(&late), 0);
    }

    #[test]
    fn test_now_is_recent() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(a <= b);
        assert!(a.as_millis() > 1_600_000_000_000);
    }
}
