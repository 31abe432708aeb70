//! Whole-file JSON document reader.
//!
//! The external process replaces the document wholesale, so a read may land
//! in the middle of a write. The reader tolerates a bounded run of parse
//! failures before treating the file as corrupt, and it only delivers a
//! document whose bytes differ from the last one delivered.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::descriptor::JsonObject;
use crate::error::ReadError;
use crate::time::{self, Millis};

/// Re-reads one JSON document when it changes.
#[derive(Debug)]
pub struct ConditionalFileReader {
    path: PathBuf,
    last_modified: Option<Millis>,
    last_content: Option<Vec<u8>>,
    failures: u32,
    max_failures: u32,
    settle_ms: Millis,
}

impl ConditionalFileReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, settle_ms: u64, max_failures: u32) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
            last_content: None,
            failures: 0,
            max_failures,
            settle_ms: Millis::try_from(settle_ms).unwrap_or(Millis::MAX),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consecutive parse failures since the last success or surfaced error.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Reads the document if it changed since the last delivery.
    ///
    /// # Errors
    ///
    /// - `ReadError::Io` if the file exists but cannot be read
    /// - `ReadError::Corrupt` once parsing has failed more than `max_failures`
    ///   times in a row; the failure count starts over afterwards
    pub fn read(&mut self) -> Result<Option<JsonObject>, ReadError> {
        self.read_at(time::now_millis())
    }

    /// `read` with an explicit current time.
    ///
    /// # Errors
    ///
    /// See [`ConditionalFileReader::read`].
    pub fn read_at(&mut self, now: Millis) -> Result<Option<JsonObject>, ReadError> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ReadError::io(&self.path, e)),
        };
        let modified = time::modified_millis(&metadata).map_err(|e| ReadError::io(&self.path, e))?;

        // A file stamped moments ago may still be mid-write under the same mtime,
        // so an unchanged mtime is only trusted once it has settled.
        if self.last_modified == Some(modified) && now.saturating_sub(modified) > self.settle_ms {
            return Ok(None);
        }

        let content = match fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ReadError::io(&self.path, e)),
        };
        if self.last_content.as_deref() == Some(content.as_slice()) {
            return Ok(None);
        }

        match serde_json::from_slice::<JsonObject>(&content) {
            Ok(document) => {
                self.failures = 0;
                self.last_modified = Some(modified);
                self.last_content = Some(content);
                Ok(Some(document))
            }
            Err(e) => {
                self.failures += 1;
                if self.failures > self.max_failures {
                    let failures = self.failures;
                    self.failures = 0;
                    return Err(ReadError::Corrupt {
                        path: self.path.clone(),
                        failures,
                        source: e,
                    });
                }
                Ok(None)
            }
        }
    }
}
