//! Live-session tails driven by world log transitions.
//!
//! An `entering` entry opens a tail on the world's restricted play log and a
//! `leave` entry schedules it to close after a grace period, so lines flushed
//! just before the leave are still delivered. A session that was opened and
//! left before it was ever polled is discarded without reading; this happens
//! when the world log's history is replayed on the first read.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::descriptor::JsonObject;
use crate::error::{ReadError, WatchError};
use crate::instance::{InstanceHandle, InstanceId};
use crate::path_ref::RelativePathRef;
use crate::sink::ErrorSink;
use crate::tail::IncrementalLogReader;
use crate::time::Millis;

/// Live-session log location relative to a world directory.
pub const LIVE_LOG_RELATIVE_PATH: [&str; 3] = ["hermes", "restricted", "play.log.enc"];

/// Live-session log path for a world directory.
#[must_use]
pub fn live_log_path(world: &Path) -> PathBuf {
    LIVE_LOG_RELATIVE_PATH
        .iter()
        .fold(world.to_path_buf(), |p, part| p.join(part))
}

/// One opaque line from a live-session log.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct LiveSessionEntry {
    pub instance: Arc<JsonObject>,
    pub world_path: Arc<Path>,
    pub line: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Transition {
    Entering { world: RelativePathRef, time: Millis },
    Leave { world: RelativePathRef, time: Millis },
}

impl Transition {
    fn is_transition(entry: &JsonObject) -> bool {
        matches!(entry.get("type").and_then(Value::as_str), Some("entering" | "leave"))
    }
}

#[derive(Debug)]
struct LiveSession {
    owner: InstanceId,
    instance: Arc<JsonObject>,
    world_path: Arc<Path>,
    reader: IncrementalLogReader,
    expiration: Option<Millis>,
    polled: bool,
}

impl LiveSession {
    fn has_expired(&self, now: Millis) -> bool {
        self.expiration.is_some_and(|at| at < now)
    }
}

/// Tails the live-session log of every world a player is currently in.
#[derive(Debug)]
pub struct EphemeralSessionTracker {
    sessions: BTreeMap<PathBuf, LiveSession>,
    grace_ms: Millis,
}

impl EphemeralSessionTracker {
    #[must_use]
    pub fn new(grace_ms: u64) -> Self {
        Self {
            sessions: BTreeMap::new(),
            grace_ms: Millis::try_from(grace_ms).unwrap_or(Millis::MAX),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether a session is open for the given world directory.
    #[must_use]
    pub fn contains(&self, world_path: &Path) -> bool {
        self.sessions.contains_key(world_path)
    }

    /// Feeds one world log entry. Entries that are not world transitions are
    /// ignored.
    pub fn observe(&mut self, instance: &InstanceHandle, entry: &JsonObject, sink: &dyn ErrorSink) {
        if !Transition::is_transition(entry) {
            return;
        }
        let transition: Transition = match serde_json::from_value(Value::Object(entry.clone())) {
            Ok(t) => t,
            Err(e) => {
                let path = instance.world_log.clone().unwrap_or_default();
                sink.report("Failed to parse world transition", &ReadError::parse(path, e).into());
                return;
            }
        };
        let (world, time) = match &transition {
            Transition::Entering { world, time } | Transition::Leave { world, time } => (world, *time),
        };
        let Some(world_path) = world.resolve(instance.working_dir.as_deref()) else {
            sink.report(
                "Failed to resolve world path",
                &WatchError::internal(format!("relative world path {:?} without a working directory", world.path)),
            );
            return;
        };

        match transition {
            Transition::Entering { .. } => {
                if let Some(mut previous) = self.sessions.remove(&world_path) {
                    previous.reader.close();
                }
                tracing::debug!(world = %world_path.display(), "live session opened");
                let session = LiveSession {
                    owner: instance.id,
                    instance: Arc::clone(&instance.payload),
                    reader: IncrementalLogReader::new(live_log_path(&world_path)),
                    world_path: Arc::from(world_path.as_path()),
                    expiration: None,
                    polled: false,
                };
                self.sessions.insert(world_path, session);
            }
            Transition::Leave { .. } => self.leave(&world_path, time),
        }
    }

    /// Applies an implicit leave at `now` to sessions whose instance is no
    /// longer live.
    pub fn release_missing(&mut self, instances: &[InstanceHandle], now: Millis) {
        let live: HashSet<InstanceId> = instances.iter().map(|i| i.id).collect();
        let orphaned: Vec<PathBuf> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.expiration.is_none() && !live.contains(&s.owner))
            .map(|(path, _)| path.clone())
            .collect();
        for path in orphaned {
            self.leave(&path, now);
        }
    }

    /// Reads new lines from every open session, then closes the expired ones.
    pub fn tick(&mut self, now: Millis, sink: &dyn ErrorSink) -> Vec<LiveSessionEntry> {
        let mut out = Vec::new();
        let mut failed = Vec::new();
        for (path, session) in &mut self.sessions {
            session.polled = true;
            let instance = &session.instance;
            let world_path = &session.world_path;
            let result = session.reader.read(|line| {
                out.push(LiveSessionEntry {
                    instance: Arc::clone(instance),
                    world_path: Arc::clone(world_path),
                    line: line.bytes.to_vec(),
                });
            });
            if let Err(e) = result {
                sink.report("Failed to read live session log", &e.into());
                session.reader.close();
                failed.push(path.clone());
            }
        }
        for path in failed {
            self.sessions.remove(&path);
        }

        self.sessions.retain(|path, session| {
            if !session.has_expired(now) {
                return true;
            }
            session.reader.close();
            tracing::debug!(world = %path.display(), "live session closed");
            false
        });
        out
    }

    fn leave(&mut self, world_path: &Path, time: Millis) {
        let Some(session) = self.sessions.get_mut(world_path) else {
            return;
        };
        if session.polled {
            session.expiration = Some(time.saturating_add(self.grace_ms));
        } else if let Some(mut session) = self.sessions.remove(world_path) {
            session.reader.close();
        }
    }
}
