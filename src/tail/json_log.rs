//! JSON-object-per-line log reader.

use std::path::{Path, PathBuf};

use crate::descriptor::JsonObject;
use crate::error::ReadError;
use crate::sink::ErrorSink;

use super::log_reader::IncrementalLogReader;

/// Tails a log whose lines are JSON objects.
///
/// A malformed line is reported and dropped; it does not stop the stream.
#[derive(Debug)]
pub struct JsonLogReader {
    path: PathBuf,
    lines: IncrementalLogReader,
}

impl JsonLogReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            lines: IncrementalLogReader::new(path.clone()),
            path,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delivers every new entry with its `is_new` flag.
    ///
    /// # Errors
    ///
    /// Returns `ReadError::Io` from the underlying reader.
    pub fn read<F>(&mut self, sink: &dyn ErrorSink, mut on_entry: F) -> Result<(), ReadError>
    where
        F: FnMut(JsonObject, bool),
    {
        let path = &self.path;
        self.lines.read(|line| match serde_json::from_slice::<JsonObject>(line.bytes) {
            Ok(entry) => on_entry(entry, line.is_new),
            Err(e) => sink.report("Failed to parse world log entry", &ReadError::parse(path, e).into()),
        })
    }

    /// Releases the file handle. Idempotent.
    pub fn close(&mut self) {
        self.lines.close();
    }
}
