use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::JsonObject;

use super::executor::Executor;

/// Receives instance lifecycle events.
///
/// `is_new` is false for instances already present on the first scan after
/// start.
pub trait InstanceSubscriber: Send + Sync {
    /// An instance was discovered.
    fn on_new_instance(&self, instance: &JsonObject, is_new: bool);
    /// An instance's descriptor was removed, replaced, or its heartbeat died.
    fn on_instance_closed(&self, instance: &JsonObject);
}

/// Receives changed state documents.
pub trait StateSubscriber: Send + Sync {
    /// Called with the full new document.
    fn on_state_change(&self, instance: &JsonObject, state: &JsonObject);
}

/// Receives world log entries.
///
/// `is_new` is false for entries that were already in the log when tailing
/// began.
pub trait WorldLogSubscriber: Send + Sync {
    #[allow(missing_docs)]
    fn on_world_log_entry(&self, instance: &JsonObject, entry: &JsonObject, is_new: bool);
}

/// Receives opaque live-session log lines.
pub trait LiveSessionSubscriber: Send + Sync {
    /// `line` is raw bytes without the trailing newline.
    fn on_live_session_entry(&self, instance: &JsonObject, world_path: &Path, line: &[u8]);
}

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Create a new random subscriber id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscriber together with where its callbacks run.
pub(crate) struct Registered<S: ?Sized> {
    pub(crate) id: SubscriberId,
    pub(crate) interval: Duration,
    subscriber: Arc<S>,
    executor: Option<Arc<dyn Executor>>,
}

impl<S: ?Sized + Send + Sync + 'static> Registered<S> {
    pub(crate) fn new(subscriber: Arc<S>, interval: Duration, executor: Option<Arc<dyn Executor>>) -> Self {
        Self {
            id: SubscriberId::new(),
            interval,
            subscriber,
            executor,
        }
    }

    /// Runs one callback inline, or hands it to the executor.
    ///
    /// A job the executor refuses is dropped.
    pub(crate) fn deliver<F>(&self, callback: F)
    where
        F: FnOnce(&S) + Send + 'static,
    {
        let Some(executor) = self.executor.as_ref() else {
            callback(&*self.subscriber);
            return;
        };
        let subscriber = Arc::clone(&self.subscriber);
        if let Err(e) = executor.execute(Box::new(move || callback(&*subscriber))) {
            tracing::debug!(subscriber = %self.id, error = %e, "delivery dropped");
        }
    }
}

impl<S: ?Sized> fmt::Debug for Registered<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registered")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}
