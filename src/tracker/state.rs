use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::descriptor::JsonObject;
use crate::instance::{InstanceHandle, InstanceId};
use crate::sink::ErrorSink;
use crate::tail::ConditionalFileReader;
use crate::time::Millis;

/// State document location relative to an instance's working directory.
pub const STATE_RELATIVE_PATH: [&str; 2] = ["hermes", "state.json"];

/// State document path for a working directory.
#[must_use]
pub fn state_path(working_dir: &Path) -> PathBuf {
    STATE_RELATIVE_PATH
        .iter()
        .fold(working_dir.to_path_buf(), |p, part| p.join(part))
}

/// A changed state document.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct StateChange {
    pub instance: InstanceHandle,
    pub state: JsonObject,
}

/// Polls the state document of every live instance.
#[derive(Debug)]
pub struct StateTracker {
    readers: HashMap<InstanceId, ConditionalFileReader>,
    settle_ms: u64,
    max_failures: u32,
}

impl StateTracker {
    #[must_use]
    pub fn new(settle_ms: u64, max_failures: u32) -> Self {
        Self {
            readers: HashMap::new(),
            settle_ms,
            max_failures,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Returns the instances whose state document changed.
    ///
    /// Instances without a working directory have no state document.
    pub fn tick(&mut self, instances: &[InstanceHandle], now: Millis, sink: &dyn ErrorSink) -> Vec<StateChange> {
        let live: HashSet<InstanceId> = instances.iter().map(|i| i.id).collect();
        self.readers.retain(|id, _| live.contains(id));

        let mut out = Vec::new();
        for instance in instances {
            let Some(working_dir) = instance.working_dir.as_deref() else {
                continue;
            };
            let (settle_ms, max_failures) = (self.settle_ms, self.max_failures);
            let reader = self
                .readers
                .entry(instance.id)
                .or_insert_with(|| ConditionalFileReader::new(state_path(working_dir), settle_ms, max_failures));
            match reader.read_at(now) {
                Ok(Some(state)) => out.push(StateChange {
                    instance: instance.clone(),
                    state,
                }),
                Ok(None) => {}
                Err(e) => sink.report("Failed to read state file", &e.into()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    use crate::error::WatchError;
    use crate::sink::TracingSink;
    use crate::time::now_millis;

    fn handle(working_dir: Option<&Path>) -> InstanceHandle {
        InstanceHandle {
            id: InstanceId::new(),
            payload: Arc::new(JsonObject::new()),
            working_dir: working_dir.map(Path::to_path_buf),
            world_log: None,
        }
    }

    #[test]
    fn delivers_changes_per_instance() {
        let dir = tempdir().unwrap();
        let state = state_path(dir.path());
        fs::create_dir_all(state.parent().unwrap()).unwrap();
        fs::write(&state, r#"{"screen": "title"}"#).unwrap();

        let a = handle(Some(dir.path()));
        let mut tracker = StateTracker::new(50, 10);
        let changes = tracker.tick(&[a.clone(), handle(None)], now_millis(), &TracingSink);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].instance.id, a.id);
        assert_eq!(changes[0].state["screen"], "title");

        assert!(tracker.tick(&[a.clone()], now_millis(), &TracingSink).is_empty());
        assert!(tracker.tick(&[], now_millis(), &TracingSink).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn persistent_corruption_is_reported() {
        let dir = tempdir().unwrap();
        let state = state_path(dir.path());
        fs::create_dir_all(state.parent().unwrap()).unwrap();
        fs::write(&state, "{\"unterminated").unwrap();

        let reports = Mutex::new(0usize);
        let sink = |_: &str, e: &WatchError| {
            assert!(!e.is_retryable());
            *reports.lock().unwrap() += 1;
        };
        let a = handle(Some(dir.path()));
        let mut tracker = StateTracker::new(50, 10);
        for _ in 0..11 {
            assert!(tracker.tick(&[a.clone()], now_millis(), &sink).is_empty());
        }
        assert_eq!(*reports.lock().unwrap(), 1);
    }
}
