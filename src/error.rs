//! Error types for tailwatch.
//!
//! All errors are strongly typed using thiserror. Read errors carry the path
//! they happened on so a sink can report them without extra context.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading an observed file.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is still unparseable after {failures} consecutive reads: {source}")]
    Corrupt {
        path: PathBuf,
        failures: u32,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid heartbeat at {path}: {reason}")]
    Heartbeat {
        path: PathBuf,
        reason: String,
    },
}

impl ReadError {
    /// Wraps an I/O error with the path it happened on.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps a JSON error with the path it happened on.
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

/// Violations of the scheduler's usage contract.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Scheduler already started, subscribers must be registered before start")]
    AlreadyStarted,

    #[error("No subscribers registered, add at least one before starting")]
    NoSubscribers,

    #[error("Failed to spawn scheduler thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
}

/// Failures handing a delivery job to an executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor queue full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Executor is shut down")]
    Disconnected,
}

/// Top-level error type for tailwatch.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl WatchError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a read error.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::Read(_))
    }

    /// Returns true if this is a contract violation.
    #[must_use]
    pub const fn is_contract(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the next poll may succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Read(e) => matches!(e, ReadError::Io { .. } | ReadError::Parse { .. }),
            Self::Executor(e) => matches!(e, ExecutorError::QueueFull { .. }),
            Self::Contract(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for tailwatch operations.
pub type WatchResult<T> = Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{").unwrap_err()
    }

    #[test]
    fn test_read_error_io_mentions_path() {
        let err = ReadError::io("/tmp/state.json", io::Error::new(io::ErrorKind::Other, "locked"));
        let msg = format!("{err}");
        assert!(msg.contains("/tmp/state.json"));
        assert!(msg.contains("locked"));
    }

    #[test]
    fn test_read_error_corrupt() {
        let err = ReadError::Corrupt {
            path: PathBuf::from("state.json"),
            failures: 11,
            source: json_error(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("11 consecutive"));
    }

    #[test]
    fn test_contract_errors() {
        let msg = format!("{}", ContractError::AlreadyStarted);
        assert!(msg.contains("already started"));
        let msg = format!("{}", ContractError::NoSubscribers);
        assert!(msg.contains("No subscribers"));
    }

    #[test]
    fn test_watch_error_from_read() {
        let err: WatchError = ReadError::parse("log", json_error()).into();
        assert!(err.is_read());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_watch_error_from_contract() {
        let err: WatchError = ContractError::NoSubscribers.into();
        assert!(err.is_contract());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_executor_queue_full_is_retryable() {
        let err: WatchError = ExecutorError::QueueFull { capacity: 4 }.into();
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("capacity 4"));
        let err: WatchError = ExecutorError::Disconnected.into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_watch_error_internal() {
        let err = WatchError::internal("loop panicked");
        assert!(err.is_internal());
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("loop panicked"));
    }

    #[test]
    fn test_corrupt_and_heartbeat_not_retryable() {
        let corrupt: WatchError = ReadError::Corrupt {
            path: PathBuf::from("s"),
            failures: 11,
            source: json_error(),
        }
        .into();
        assert!(!corrupt.is_retryable());

        let heartbeat: WatchError = ReadError::Heartbeat {
            path: PathBuf::from("alive"),
            reason: "pid mismatch".to_string(),
        }
        .into();
        assert!(!heartbeat.is_retryable());
    }
}
