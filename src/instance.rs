//! A discovered external process.
//!
//! An `Instance` is created from one descriptor file and lives until the
//! registry closes or destroys it. Destroying additionally deletes the
//! descriptor file, which is how dead processes are cleaned up after.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::{InstanceInfo, JsonObject};
use crate::error::{ReadError, WatchError};
use crate::heartbeat::{self, Heartbeat};
use crate::sink::ErrorSink;
use crate::time::Millis;

/// Identity of one `Instance` object.
///
/// A descriptor rewritten at the same key produces a new instance with a new
/// id, so trackers keyed by `InstanceId` never reuse readers across
/// generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Create a new random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap snapshot of an instance handed to trackers.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    pub id: InstanceId,
    /// Raw descriptor payload, as delivered to subscribers.
    pub payload: Arc<JsonObject>,
    pub working_dir: Option<PathBuf>,
    pub world_log: Option<PathBuf>,
}

/// One discovered external process.
#[derive(Debug)]
pub struct Instance {
    id: InstanceId,
    descriptor_path: PathBuf,
    modified: Millis,
    payload: Arc<JsonObject>,
    info: Option<InstanceInfo>,
    closing: bool,
    heartbeat: Option<Heartbeat>,
}

impl Instance {
    /// Builds an instance from a parsed descriptor payload.
    ///
    /// A payload whose typed fields do not parse is still accepted; it is
    /// reported and the instance is treated as always alive.
    pub fn new(descriptor_path: PathBuf, modified: Millis, payload: JsonObject, sink: &dyn ErrorSink) -> Self {
        let info = match InstanceInfo::from_payload(&payload) {
            Ok(info) => Some(info),
            Err(e) => {
                sink.report(
                    "Failed to parse instance info",
                    &ReadError::parse(&descriptor_path, e).into(),
                );
                None
            }
        };
        Self {
            id: InstanceId::new(),
            descriptor_path,
            modified,
            payload: Arc::new(payload),
            info,
            closing: false,
            heartbeat: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Descriptor mtime this instance was built from.
    #[must_use]
    pub const fn modified(&self) -> Millis {
        self.modified
    }

    #[must_use]
    pub fn descriptor_path(&self) -> &Path {
        &self.descriptor_path
    }

    #[must_use]
    pub fn payload(&self) -> &Arc<JsonObject> {
        &self.payload
    }

    #[must_use]
    pub const fn info(&self) -> Option<&InstanceInfo> {
        self.info.as_ref()
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.info.as_ref().and_then(InstanceInfo::working_dir_path)
    }

    /// True once the instance has been closed. Closing does not imply the
    /// external process exited, only that this handle is finished.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        self.closing
    }

    #[must_use]
    pub fn handle(&self) -> InstanceHandle {
        InstanceHandle {
            id: self.id,
            payload: Arc::clone(&self.payload),
            working_dir: self.working_dir(),
            world_log: self.info.as_ref().and_then(InstanceInfo::world_log_path),
        }
    }

    /// Decides whether the external process is gone.
    ///
    /// Only decidable when the descriptor has both a working directory and a
    /// pid; otherwise the instance is assumed alive. Read failures count as
    /// dead.
    pub fn should_destroy(&mut self, now: Millis, max_age_ms: u64, sink: &dyn ErrorSink) -> bool {
        if self.closing {
            return false;
        }
        let Some(working_dir) = self.working_dir() else {
            return false;
        };
        let Some(pid) = self.info.as_ref().and_then(|i| i.pid) else {
            return false;
        };
        !self.heartbeat_alive(&working_dir, pid, now, max_age_ms, sink)
    }

    fn heartbeat_alive(
        &mut self,
        working_dir: &Path,
        pid: i64,
        now: Millis,
        max_age_ms: u64,
        sink: &dyn ErrorSink,
    ) -> bool {
        let path = heartbeat::heartbeat_path(working_dir);
        if !path.exists() {
            return false;
        }
        if self.heartbeat.is_none() {
            match Heartbeat::open(&path, pid) {
                Ok(hb) => self.heartbeat = Some(hb),
                Err(ReadError::Heartbeat { reason, .. }) => {
                    tracing::debug!(path = %path.display(), %reason, "heartbeat belongs to another process");
                    return false;
                }
                Err(e) => {
                    sink.report("Failed to read heartbeat file", &e.into());
                    return false;
                }
            }
        }
        let Some(hb) = self.heartbeat.as_mut() else {
            return false;
        };
        match hb.is_fresh(now, max_age_ms) {
            Ok(fresh) => fresh,
            Err(e) => {
                sink.report("Failed to read heartbeat file", &e.into());
                false
            }
        }
    }

    /// Marks the instance closing and releases the heartbeat handle.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        self.heartbeat = None;
    }

    /// Closes the instance and deletes its descriptor file.
    pub fn destroy(&mut self, sink: &dyn ErrorSink) {
        self.close();
        match fs::remove_file(&self.descriptor_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => sink.report(
                "Failed to delete instance descriptor",
                &WatchError::from(ReadError::io(&self.descriptor_path, e)),
            ),
        }
    }
}
