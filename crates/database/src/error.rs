//! Database errors tagged with a retry classification

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// How the coordinator should treat a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Deadlock, lock timeout or serialization conflict
    Deadlock,
    /// Connection, network or availability problem
    Transient,
    /// Non-retryable failure reported by the driver (constraint, syntax, data)
    Fatal,
    /// Application failure raised by the unit of work
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a database adapter or by a unit of work
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DatabaseError {
    kind: ErrorKind,
    code: Option<String>,
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl DatabaseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn deadlock(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Deadlock, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    /// Wrap a raw driver failure, classifying it by code and message
    pub fn from_driver(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify(code, &message),
            code: code.map(str::to_string),
            message,
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

const DEADLOCK_CODES: &[&str] = &[
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "40001", // serialization_failure
    "1213",  // ER_LOCK_DEADLOCK
    "1205",  // ER_LOCK_WAIT_TIMEOUT
];

const TRANSIENT_CODES: &[&str] = &[
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
    "53300", // too_many_connections
    "2006",  // CR_SERVER_GONE_ERROR
    "2013",  // CR_SERVER_LOST
];

const DEADLOCK_PHRASES: &[&str] = &["deadlock", "lock timeout"];

const TRANSIENT_PHRASES: &[&str] = &[
    "connection",
    "timeout",
    "network",
    "temporary",
    "retry",
    "unavailable",
];

/// Map a driver error code and message onto an [`ErrorKind`].
///
/// Known codes win. The message is only consulted when the code is absent or
/// unknown.
pub fn classify(code: Option<&str>, message: &str) -> ErrorKind {
    if let Some(code) = code.map(str::trim) {
        if DEADLOCK_CODES.contains(&code) {
            return ErrorKind::Deadlock;
        }
        if TRANSIENT_CODES.contains(&code) || code.starts_with("08") {
            return ErrorKind::Transient;
        }
        if code.len() == 5 && ["22", "23", "42"].iter().any(|class| code.starts_with(class)) {
            return ErrorKind::Fatal;
        }
    }

    let message = message.to_ascii_lowercase();
    if DEADLOCK_PHRASES.iter().any(|p| message.contains(p)) {
        ErrorKind::Deadlock
    } else if TRANSIENT_PHRASES.iter().any(|p| message.contains(p)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Other
    }
}
