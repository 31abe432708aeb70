//! File readers.
//!
//! Two reading disciplines are supported: append-only files read line by line
//! from a remembered offset, and whole documents re-read when they change.

/// Append-only reader that never delivers a partial line.
pub mod log_reader;
/// JSON-object-per-line wrapper over `log_reader`.
pub mod json_log;
/// Whole-file JSON document reader with change detection.
pub mod conditional;

pub use conditional::ConditionalFileReader;
pub use json_log::JsonLogReader;
pub use log_reader::{IncrementalLogReader, TailLine};
