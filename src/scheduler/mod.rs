//! Subscriber registration and the background polling loop.
//!
//! A [`Scheduler`] owns every tracker. Subscribers are registered before
//! `start`; the loop then runs on one named thread and fans out each tick's
//! deltas, either inline or through a subscriber's [`Executor`].

/// The scheduler and its loop thread.
pub mod dispatcher;
/// Where subscriber callbacks run.
pub mod executor;
/// Subscriber traits and identities.
pub mod subscriber;

pub use dispatcher::{Phase, Scheduler};
pub use executor::{Executor, Inline, Job, WorkerPool};
pub use subscriber::{
    InstanceSubscriber, LiveSessionSubscriber, StateSubscriber, SubscriberId, WorldLogSubscriber,
};
