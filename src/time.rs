//! Millisecond timestamps.
//!
//! The external process stamps heartbeats and log entries with Unix epoch
//! milliseconds, so every comparison in this crate is done in the same unit.

use std::fs::Metadata;
use std::io;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Unix epoch milliseconds.
pub type Millis = i64;

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> Millis {
    Utc::now().timestamp_millis()
}

/// Converts a `SystemTime` to epoch milliseconds.
#[must_use]
pub fn system_time_millis(time: SystemTime) -> Millis {
    DateTime::<Utc>::from(time).timestamp_millis()
}

/// Last modification time of a file in epoch milliseconds.
///
/// # Errors
///
/// Returns an error if the platform does not report modification times.
pub fn modified_millis(metadata: &Metadata) -> io::Result<Millis> {
    metadata.modified().map(system_time_millis)
}

/// Absolute distance between two timestamps.
#[must_use]
pub const fn distance(a: Millis, b: Millis) -> u64 {
    a.abs_diff(b)
}
