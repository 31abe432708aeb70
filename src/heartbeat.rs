//! Heartbeat file reader.
//!
//! The external process keeps a small binary file up to date to prove it is
//! alive.
//!
//! # File Format
//! ```text
//! [PID: 8 bytes, big-endian i64][TIMESTAMP: 8 bytes, big-endian i64 epoch ms]
//! ```
//!
//! The reader keeps the file open between checks. The pid is verified once, on
//! open; every check re-reads the timestamp field.

use std::fs::File;
use std::io::{Read, Result as IoResult, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::ReadError;
use crate::time::{self, Millis};

/// Heartbeat location relative to an instance's working directory.
pub const HEARTBEAT_RELATIVE_PATH: [&str; 2] = ["hermes", "alive"];

/// Byte offset of the pid field.
pub const PID_OFFSET: u64 = 0;
/// Byte offset of the timestamp field.
pub const TIMESTAMP_OFFSET: u64 = 8;
/// Total length of the heartbeat layout.
pub const HEARTBEAT_LEN: usize = 16;

/// Heartbeat path for a working directory.
#[must_use]
pub fn heartbeat_path(working_dir: &Path) -> PathBuf {
    HEARTBEAT_RELATIVE_PATH
        .iter()
        .fold(working_dir.to_path_buf(), |p, part| p.join(part))
}

/// Reads the big-endian i64 field at `offset`.
fn read_i64_at(file: &mut File, offset: u64) -> IoResult<i64> {
    let mut buf = [0u8; 8];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// Encodes a heartbeat record. Used by tests and tooling that fake an
/// external process.
#[must_use]
pub fn encode(pid: i64, timestamp: Millis) -> [u8; HEARTBEAT_LEN] {
    let mut out = [0u8; HEARTBEAT_LEN];
    out[..8].copy_from_slice(&pid.to_be_bytes());
    out[8..].copy_from_slice(&timestamp.to_be_bytes());
    out
}

/// An open heartbeat file whose pid has been verified.
#[derive(Debug)]
pub struct Heartbeat {
    path: PathBuf,
    file: File,
}

impl Heartbeat {
    /// Opens the heartbeat and verifies it belongs to `expected_pid`.
    ///
    /// # Errors
    ///
    /// - `ReadError::Io` if the file cannot be opened or is shorter than the pid field
    /// - `ReadError::Heartbeat` if the pid field names another process
    pub fn open(path: &Path, expected_pid: i64) -> Result<Self, ReadError> {
        let mut file = File::open(path).map_err(|e| ReadError::io(path, e))?;
        let pid = read_i64_at(&mut file, PID_OFFSET).map_err(|e| ReadError::io(path, e))?;
        if pid != expected_pid {
            return Err(ReadError::Heartbeat {
                path: path.to_path_buf(),
                reason: format!("pid {pid} does not match descriptor pid {expected_pid}"),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the timestamp field.
    ///
    /// # Errors
    ///
    /// Returns `ReadError::Io` if the field cannot be read.
    pub fn timestamp(&mut self) -> Result<Millis, ReadError> {
        read_i64_at(&mut self.file, TIMESTAMP_OFFSET).map_err(|e| ReadError::io(&self.path, e))
    }

    /// Whether the timestamp is within `max_age_ms` of `now`.
    ///
    /// # Errors
    ///
    /// Returns `ReadError::Io` if the timestamp cannot be read.
    pub fn is_fresh(&mut self, now: Millis, max_age_ms: u64) -> Result<bool, ReadError> {
        let stamp = self.timestamp()?;
        Ok(time::distance(now, stamp) < max_age_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn layout_is_big_endian_pid_then_timestamp() {
        let bytes = encode(1, 0x0102_0304_0506_0708);
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn fresh_heartbeat_is_alive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alive");
        fs::write(&path, encode(77, 10_000)).unwrap();

        let mut hb = Heartbeat::open(&path, 77).unwrap();
        assert_eq!(hb.timestamp().unwrap(), 10_000);
        assert!(hb.is_fresh(14_999, 5000).unwrap());
        assert!(!hb.is_fresh(15_000, 5000).unwrap());
        assert!(hb.is_fresh(5_001, 5000).unwrap());
    }

    #[test]
    fn timestamp_is_reread_on_every_check() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alive");
        fs::write(&path, encode(5, 1_000)).unwrap();
        let mut hb = Heartbeat::open(&path, 5).unwrap();
        assert!(!hb.is_fresh(100_000, 5000).unwrap());

        // Overwrite in place so the open handle sees the new bytes.
        let mut f = fs::OpenOptions::new().write(true).open(&path).unwrap();
        std::io::Write::write_all(&mut f, &encode(5, 99_000)).unwrap();
        drop(f);

        assert!(hb.is_fresh(100_000, 5000).unwrap());
    }

    #[test]
    fn pid_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alive");
        fs::write(&path, encode(1, 0)).unwrap();
        let err = Heartbeat::open(&path, 2).unwrap_err();
        assert!(matches!(err, ReadError::Heartbeat { .. }));
    }

    #[test]
    fn truncated_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alive");
        fs::write(&path, [0u8; 8]).unwrap();
        let mut hb = Heartbeat::open(&path, 0).unwrap();
        assert!(matches!(hb.timestamp(), Err(ReadError::Io { .. })));
    }

    #[test]
    fn heartbeat_path_is_under_working_dir() {
        assert_eq!(heartbeat_path(Path::new("/g")), PathBuf::from("/g/hermes/alive"));
    }
}
