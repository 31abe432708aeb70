//! Incremental reader for append-only line files.
//!
//! The reader remembers the byte offset just past the last complete line it
//! delivered. Each `read` seeks there, consumes only bytes that exist at the
//! time of the call, and stops at the first line that has no terminator yet.
//! The offset is committed line by line, so an unfinished write or an I/O error
//! never skips or duplicates a byte.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::ReadError;

/// Line terminator.
pub const TERMINATOR: u8 = b'\n';

/// A complete line, without its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailLine<'a> {
    pub bytes: &'a [u8],
    /// False only for lines already present during this reader's first read.
    pub is_new: bool,
}

/// Tails one append-only file.
#[derive(Debug)]
pub struct IncrementalLogReader {
    path: PathBuf,
    file: Option<File>,
    offset: u64,
    first_read: bool,
    line: Vec<u8>,
}

impl IncrementalLogReader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            offset: 0,
            first_read: true,
            line: Vec::with_capacity(128),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last delivered line.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Delivers every complete line appended since the previous call.
    ///
    /// A file that does not exist yet is not an error; it is opened on the
    /// first call that finds it.
    ///
    /// # Errors
    ///
    /// Returns `ReadError::Io` if opening, seeking or reading fails. Lines
    /// delivered before the failure stay delivered; the rest are read again on
    /// the next call.
    pub fn read<F>(&mut self, mut on_line: F) -> Result<(), ReadError>
    where
        F: FnMut(TailLine<'_>),
    {
        let first_read = std::mem::replace(&mut self.first_read, false);

        if self.file.is_none() {
            match File::open(&self.path) {
                Ok(file) => {
                    self.file = Some(file);
                    self.offset = 0;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(ReadError::io(&self.path, e)),
            }
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let len = file.metadata().map_err(|e| ReadError::io(&self.path, e))?.len();
        if len < self.offset {
            tracing::debug!(path = %self.path.display(), "tailed file truncated; resetting offset");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| ReadError::io(&self.path, e))?;
        let mut reader = BufReader::new(file.take(len - self.offset));

        loop {
            self.line.clear();
            let n = reader
                .read_until(TERMINATOR, &mut self.line)
                .map_err(|e| ReadError::io(&self.path, e))?;
            if n == 0 || self.line.last() != Some(&TERMINATOR) {
                // Nothing new, or the writer has not finished this line.
                break;
            }
            self.offset += n as u64;
            on_line(TailLine {
                bytes: &self.line[..n - 1],
                is_new: !first_read,
            });
        }
        self.line.clear();
        Ok(())
    }

    /// Releases the file handle. The next `read` reopens the file from the
    /// start. Idempotent.
    pub fn close(&mut self) {
        self.file = None;
        self.offset = 0;
        self.line.clear();
    }
}
