//! Coordinator configuration
//!
//! Defaults match the documented transaction behaviour. `from_env` overrides
//! them from `HASIVU_TX_*` variables; durations are given in milliseconds.

use crate::options::TransactionOptions;
use crate::retry::{BackoffPolicy, RetryPolicy};
use hasivu_common::IsolationLevel;
use hasivu_lock::{LockOptions, MIN_TTL};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Configuration for a `TransactionCoordinator`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Isolation level for options built by the coordinator
    pub isolation_level: IsolationLevel,

    pub timeout: Duration,
    pub retry_count: u32,
    pub deadlock_detection: bool,
    pub metrics: bool,

    /// Lease length for locks built by the coordinator
    pub lock_ttl: Duration,
    pub lock_retry_delay: Duration,
    pub lock_max_retries: u32,

    /// How often the background sweeper prunes expired registry entries
    pub lock_sweep_interval: Duration,

    pub retry_policy: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let options = TransactionOptions::default();
        let lock = LockOptions::new("");

        Self {
            isolation_level: options.isolation_level,
            timeout: options.timeout,
            retry_count: options.retry_count,
            deadlock_detection: options.deadlock_detection,
            metrics: options.metrics,
            lock_ttl: lock.ttl,
            lock_retry_delay: lock.retry_delay,
            lock_max_retries: lock.max_retries,
            lock_sweep_interval: Duration::from_secs(60),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let policy = defaults.retry_policy;

        let config = Self {
            isolation_level: load(&lookup, "HASIVU_TX_ISOLATION_LEVEL", defaults.isolation_level)?,
            timeout: load_millis(&lookup, "HASIVU_TX_TIMEOUT_MS", defaults.timeout)?,
            retry_count: load(&lookup, "HASIVU_TX_RETRY_COUNT", defaults.retry_count)?,
            deadlock_detection: load(
                &lookup,
                "HASIVU_TX_DEADLOCK_DETECTION",
                defaults.deadlock_detection,
            )?,
            metrics: load(&lookup, "HASIVU_TX_METRICS", defaults.metrics)?,
            lock_ttl: load_millis(&lookup, "HASIVU_TX_LOCK_TTL_MS", defaults.lock_ttl)?,
            lock_retry_delay: load_millis(
                &lookup,
                "HASIVU_TX_LOCK_RETRY_DELAY_MS",
                defaults.lock_retry_delay,
            )?,
            lock_max_retries: load(
                &lookup,
                "HASIVU_TX_LOCK_MAX_RETRIES",
                defaults.lock_max_retries,
            )?,
            lock_sweep_interval: load_millis(
                &lookup,
                "HASIVU_TX_LOCK_SWEEP_INTERVAL_MS",
                defaults.lock_sweep_interval,
            )?,
            retry_policy: RetryPolicy {
                deadlock: BackoffPolicy::new(
                    load_millis(&lookup, "HASIVU_TX_DEADLOCK_BACKOFF_BASE_MS", policy.deadlock.base)?,
                    load_millis(&lookup, "HASIVU_TX_DEADLOCK_BACKOFF_CAP_MS", policy.deadlock.cap)?,
                ),
                transient: BackoffPolicy::new(
                    load_millis(&lookup, "HASIVU_TX_TRANSIENT_BACKOFF_BASE_MS", policy.transient.base)?,
                    load_millis(&lookup, "HASIVU_TX_TRANSIENT_BACKOFF_CAP_MS", policy.transient.cap)?,
                ),
            },
        };

        if config.lock_ttl < MIN_TTL {
            return Err(ConfigError::Invalid {
                key: "HASIVU_TX_LOCK_TTL_MS".to_string(),
                value: config.lock_ttl.as_millis().to_string(),
                reason: format!("must be at least {}ms", MIN_TTL.as_millis()),
            });
        }

        Ok(config)
    }

    pub fn with_isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_lock_sweep_interval(mut self, interval: Duration) -> Self {
        self.lock_sweep_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Transaction options seeded from this configuration
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation_level: self.isolation_level,
            timeout: self.timeout,
            retry_count: self.retry_count,
            deadlock_detection: self.deadlock_detection,
            distributed_lock: None,
            metrics: self.metrics,
        }
    }

    /// Lock options for `key` seeded from this configuration
    pub fn lock_options(&self, key: impl Into<String>) -> LockOptions {
        LockOptions::new(key)
            .with_ttl(self.lock_ttl)
            .with_retry_delay(self.lock_retry_delay)
            .with_max_retries(self.lock_max_retries)
    }
}

fn load<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| {
            tracing::warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }
        }),
        None => {
            tracing::debug!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn load_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    load(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.lock_retry_delay, Duration::from_millis(100));
        assert_eq!(config.lock_max_retries, 10);
        assert_eq!(config.retry_policy, RetryPolicy::default());
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = CoordinatorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = CoordinatorConfig::from_lookup(lookup_from(&[
            ("HASIVU_TX_ISOLATION_LEVEL", "serializable"),
            ("HASIVU_TX_TIMEOUT_MS", "5000"),
            ("HASIVU_TX_RETRY_COUNT", "5"),
            ("HASIVU_TX_DEADLOCK_DETECTION", "false"),
            ("HASIVU_TX_LOCK_TTL_MS", "1500"),
            ("HASIVU_TX_LOCK_MAX_RETRIES", "2"),
            ("HASIVU_TX_TRANSIENT_BACKOFF_CAP_MS", "750"),
        ]))
        .unwrap();

        assert_eq!(config.isolation_level, IsolationLevel::Serializable);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.retry_count, 5);
        assert!(!config.deadlock_detection);
        assert_eq!(config.lock_ttl, Duration::from_millis(1_500));
        assert_eq!(config.lock_max_retries, 2);
        assert_eq!(config.retry_policy.transient.cap, Duration::from_millis(750));
        assert_eq!(config.retry_policy.deadlock, RetryPolicy::default().deadlock);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = CoordinatorConfig::from_lookup(lookup_from(&[("HASIVU_TX_RETRY_COUNT", "many")]))
            .unwrap_err();
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "HASIVU_TX_RETRY_COUNT");
                assert_eq!(value, "many");
            }
        }

        assert!(
            CoordinatorConfig::from_lookup(lookup_from(&[("HASIVU_TX_ISOLATION_LEVEL", "snapshot")]))
                .is_err()
        );
    }

    #[test]
    fn test_zero_lock_ttl_rejected() {
        let err = CoordinatorConfig::from_lookup(lookup_from(&[("HASIVU_TX_LOCK_TTL_MS", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "HASIVU_TX_LOCK_TTL_MS".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1ms".to_string(),
            }
        );
    }

    #[test]
    fn test_seeded_options() {
        let config = CoordinatorConfig::default()
            .with_isolation_level(IsolationLevel::RepeatableRead)
            .with_retry_count(1);

        let options = config.transaction_options();
        assert_eq!(options.isolation_level, IsolationLevel::RepeatableRead);
        assert_eq!(options.retry_count, 1);

        let lock = config.lock_options("order:9");
        assert_eq!(lock.key, "order:9");
        assert_eq!(lock.max_retries, 10);
    }
}
