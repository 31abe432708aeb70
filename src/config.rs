//! Watcher configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReadError, WatchResult};
use crate::paths;

/// Subdirectory of the root holding one descriptor file per instance.
pub const INSTANCES_DIR: &str = "instances";

/// Tunables for discovery, tailing and shutdown.
///
/// Every field has a default, so a JSON override file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Base directory; descriptors are read from `root_dir/instances`.
    pub root_dir: PathBuf,
    /// Minimum spacing between two descriptor directory scans.
    pub scan_interval_ms: u64,
    /// A heartbeat older (or newer) than this is considered dead.
    pub heartbeat_max_age_ms: u64,
    /// An unchanged state-file mtime is only trusted once it is this old.
    pub state_settle_ms: u64,
    /// Consecutive state-file parse failures tolerated before one is surfaced.
    pub state_max_failures: u32,
    /// How long a live session keeps being tailed after its "leave" event.
    pub live_session_grace_ms: u64,
    /// Number of times `stop()` checks whether the loop has exited.
    pub stop_poll_attempts: u32,
    /// Sleep between two `stop()` checks.
    pub stop_poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root_dir: paths::default_root_dir().unwrap_or_else(|| PathBuf::from(paths::ROOT_DIR_NAME)),
            scan_interval_ms: 950,
            heartbeat_max_age_ms: 5000,
            state_settle_ms: 50,
            state_max_failures: 10,
            live_session_grace_ms: 1000,
            stop_poll_attempts: 100,
            stop_poll_interval_ms: 10,
        }
    }
}

impl WatchConfig {
    /// Default configuration rooted at `root_dir`.
    #[must_use]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration override from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a read error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: &Path) -> WatchResult<Self> {
        let raw = fs::read(path).map_err(|e| ReadError::io(path, e))?;
        let config = serde_json::from_slice(&raw).map_err(|e| ReadError::parse(path, e))?;
        Ok(config)
    }

    /// Directory holding the descriptor files.
    #[must_use]
    pub fn instances_dir(&self) -> PathBuf {
        self.root_dir.join(INSTANCES_DIR)
    }

    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    #[must_use]
    pub const fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn defaults_match_external_contract() {
        let cfg = WatchConfig::with_root("/x");
        assert_eq!(cfg.heartbeat_max_age_ms, 5000);
        assert_eq!(cfg.state_settle_ms, 50);
        assert_eq!(cfg.state_max_failures, 10);
        assert_eq!(cfg.live_session_grace_ms, 1000);
        assert_eq!(cfg.instances_dir(), PathBuf::from("/x").join("instances"));
    }

    #[test]
    fn json_override_keeps_unspecified_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tailwatch.json");
        fs::write(&path, r#"{"root_dir": "/srv/hermes", "scan_interval_ms": 200, "unknown": 1}"#).unwrap();

        let cfg = WatchConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.root_dir, PathBuf::from("/srv/hermes"));
        assert_eq!(cfg.scan_interval(), Duration::from_millis(200));
        assert_eq!(cfg.stop_poll_attempts, 100);
    }

    #[test]
    fn invalid_json_is_a_read_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();

        let err = WatchConfig::from_json_file(&path).unwrap_err();
        assert!(err.is_read());
    }
}
