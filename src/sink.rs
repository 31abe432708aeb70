//! Pluggable destination for non-fatal errors.
//!
//! Every tracker reports recoverable failures (a locked file, a malformed log
//! line, a stale heartbeat read) through one `ErrorSink`, so a host
//! application can redirect them into its own logging.

use std::sync::Arc;

use crate::error::WatchError;

/// Receives non-fatal errors together with a short description of what was
/// being attempted.
pub trait ErrorSink: Send + Sync {
    /// Report an error. Must not panic.
    fn report(&self, context: &str, error: &WatchError);
}

impl<F> ErrorSink for F
where
    F: Fn(&str, &WatchError) + Send + Sync,
{
    fn report(&self, context: &str, error: &WatchError) {
        self(context, error);
    }
}

/// Default sink: emits a `tracing` warning per error.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, context: &str, error: &WatchError) {
        tracing::warn!(error = %error, "{context}");
    }
}

/// Returns the default shared sink.
#[must_use]
pub fn default_sink() -> Arc<dyn ErrorSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_sink = Arc::clone(&seen);
        let sink = move |context: &str, error: &WatchError| {
            seen_in_sink.lock().unwrap().push(format!("{context}: {error}"));
        };

        sink.report("Failed to read state file", &WatchError::internal("boom"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("Failed to read state file"));
        assert!(seen[0].contains("boom"));
    }

    #[test]
    fn tracing_sink_does_not_panic_without_subscriber() {
        TracingSink.report("context", &WatchError::internal("ignored"));
    }
}
