use std::collections::{HashMap, HashSet};

use crate::descriptor::JsonObject;
use crate::instance::{InstanceHandle, InstanceId};
use crate::sink::ErrorSink;
use crate::tail::JsonLogReader;

/// One world log entry together with the instance that wrote it.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct WorldLogEntry {
    pub instance: InstanceHandle,
    pub entry: JsonObject,
    pub is_new: bool,
}

/// Tails the world log of every live instance.
#[derive(Debug, Default)]
pub struct LogSessionTracker {
    readers: HashMap<InstanceId, JsonLogReader>,
}

impl LogSessionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open world log readers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Reads new entries from every live instance's world log.
    ///
    /// Instances without a world log are skipped. A read failure is reported
    /// and the reader keeps its position for the next tick.
    pub fn tick(&mut self, instances: &[InstanceHandle], sink: &dyn ErrorSink) -> Vec<WorldLogEntry> {
        let live: HashSet<InstanceId> = instances.iter().map(|i| i.id).collect();
        self.readers.retain(|id, reader| {
            if live.contains(id) {
                return true;
            }
            reader.close();
            false
        });

        let mut out = Vec::new();
        for instance in instances {
            let Some(path) = instance.world_log.as_ref() else {
                continue;
            };
            let reader = self
                .readers
                .entry(instance.id)
                .or_insert_with(|| JsonLogReader::new(path.clone()));
            let result = reader.read(sink, |entry, is_new| {
                out.push(WorldLogEntry {
                    instance: instance.clone(),
                    entry,
                    is_new,
                });
            });
            if let Err(e) = result {
                sink.report("Failed to read world log", &e.into());
            }
        }
        out
    }
}
