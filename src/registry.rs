//! Instance discovery by descriptor directory diffing.
//!
//! Each scan lists the descriptor directory and compares it with the known
//! instances. The descriptor mtime is the change token: an unchanged mtime
//! only triggers a liveness check, a changed one replaces the instance.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::WatchConfig;
use crate::descriptor::JsonObject;
use crate::error::ReadError;
use crate::instance::{Instance, InstanceHandle};
use crate::sink::ErrorSink;
use crate::time::{self, Millis};

/// Extension of descriptor files.
pub const DESCRIPTOR_EXTENSION: &str = ".json";

/// Result of one discovery scan.
#[derive(Debug, Default, Clone)]
pub struct RegistryDelta {
    /// Instances found on the very first scan.
    pub existing: Vec<Arc<JsonObject>>,
    /// Instances that appeared after the first scan.
    pub new: Vec<Arc<JsonObject>>,
    pub closed: Vec<Arc<JsonObject>>,
}

impl RegistryDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.existing.is_empty() && self.new.is_empty() && self.closed.is_empty()
    }
}

/// Owns every live `Instance`, keyed by descriptor file name.
#[derive(Debug)]
pub struct InstanceRegistry {
    dir: PathBuf,
    instances: BTreeMap<String, Instance>,
    first_scan: bool,
    last_scan: Option<Millis>,
    scan_interval_ms: u64,
    heartbeat_max_age_ms: u64,
}

impl InstanceRegistry {
    #[must_use]
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            dir: config.instances_dir(),
            instances: BTreeMap::new(),
            first_scan: true,
            last_scan: None,
            scan_interval_ms: config.scan_interval_ms,
            heartbeat_max_age_ms: config.heartbeat_max_age_ms,
        }
    }

    /// Descriptor directory being watched.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scans the descriptor directory if the scan interval has elapsed.
    ///
    /// Returns `None` when the scan was skipped.
    pub fn tick(&mut self, now: Millis, sink: &dyn ErrorSink) -> Option<RegistryDelta> {
        if let Some(last) = self.last_scan {
            if time::distance(now, last) <= self.scan_interval_ms {
                return None;
            }
        }
        self.last_scan = Some(now);
        Some(self.scan(now, sink))
    }

    /// Scans the descriptor directory unconditionally.
    pub fn scan(&mut self, now: Millis, sink: &dyn ErrorSink) -> RegistryDelta {
        let mut delta = RegistryDelta::default();
        match self.list_descriptors() {
            Ok(listing) => {
                self.drop_missing(&listing, &mut delta, sink);
                for (key, path) in listing {
                    self.check_descriptor(key, path, now, &mut delta, sink);
                }
            }
            Err(e) => sink.report("Failed to list instances folder", &ReadError::io(&self.dir, e).into()),
        }
        self.first_scan = false;
        delta
    }

    /// Live instances in key order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Snapshots of the live instances, for the trackers.
    #[must_use]
    pub fn handles(&self) -> Vec<InstanceHandle> {
        self.instances.values().map(Instance::handle).collect()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Instance> {
        self.instances.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn list_descriptors(&self) -> std::io::Result<BTreeMap<String, PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "instances folder does not exist yet");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e),
        };

        let mut listing = BTreeMap::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(DESCRIPTOR_EXTENSION) || !path.is_file() {
                continue;
            }
            listing.insert(name.to_string(), path);
        }
        Ok(listing)
    }

    fn drop_missing(&mut self, listing: &BTreeMap<String, PathBuf>, delta: &mut RegistryDelta, sink: &dyn ErrorSink) {
        let gone: Vec<String> = self
            .instances
            .keys()
            .filter(|key| !listing.contains_key(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(mut instance) = self.instances.remove(&key) {
                instance.destroy(sink);
                delta.closed.push(Arc::clone(instance.payload()));
            }
        }
    }

    fn check_descriptor(
        &mut self,
        key: String,
        path: PathBuf,
        now: Millis,
        delta: &mut RegistryDelta,
        sink: &dyn ErrorSink,
    ) {
        let modified = match fs::metadata(&path).and_then(|m| time::modified_millis(&m)) {
            Ok(m) => m,
            Err(e) => {
                sink.report(
                    "Failed to get last modified time of instance info file",
                    &ReadError::io(&path, e).into(),
                );
                return;
            }
        };

        if let Some(existing) = self.instances.get_mut(&key) {
            if existing.modified() == modified {
                if existing.should_destroy(now, self.heartbeat_max_age_ms, sink) {
                    existing.destroy(sink);
                    delta.closed.push(Arc::clone(existing.payload()));
                    self.instances.remove(&key);
                }
                return;
            }
        }

        // Rewritten or first seen: the previous generation is closed, not destroyed,
        // since the descriptor now belongs to the new one.
        if let Some(mut previous) = self.instances.remove(&key) {
            previous.close();
            delta.closed.push(Arc::clone(previous.payload()));
        }

        let payload = match read_payload(&path) {
            Ok(payload) => payload,
            Err(e) => {
                sink.report("Failed to read instance info file", &e.into());
                return;
            }
        };

        let mut instance = Instance::new(path, modified, payload, sink);
        if instance.should_destroy(now, self.heartbeat_max_age_ms, sink) {
            instance.destroy(sink);
            return;
        }

        let payload = Arc::clone(instance.payload());
        if self.first_scan {
            delta.existing.push(payload);
        } else {
            delta.new.push(payload);
        }
        self.instances.insert(key, instance);
    }
}

fn read_payload(path: &Path) -> Result<JsonObject, ReadError> {
    let raw = fs::read(path).map_err(|e| ReadError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| ReadError::parse(path, e))
}
