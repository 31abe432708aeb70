//! Per-instance trackers.
//!
//! Each tracker owns the readers it opened and computes the delta for one
//! event class per tick. Readers belonging to instances that are no longer
//! live are closed on the next tick.

/// Ephemeral live-session tails opened by world-log events.
pub mod live_session;
/// Per-instance state document polling.
pub mod state;
/// Per-instance world log tailing.
pub mod world_log;

pub use live_session::{EphemeralSessionTracker, LiveSessionEntry};
pub use state::{StateChange, StateTracker};
pub use world_log::{LogSessionTracker, WorldLogEntry};
