//! # tailwatch - Polling Watcher for Externally Written Game-Instance Files
//!
//! A set of external processes each announce themselves with a descriptor
//! file, prove they are alive through a binary heartbeat, and write
//! append-only logs plus a whole-file state document. tailwatch discovers
//! those processes by polling, tails their files incrementally, and hands
//! typed deltas to registered subscribers from a single background thread.
//!
//! ## Core Concepts
//!
//! - **Instance**: one external process, discovered from `<root>/instances/*.json`
//! - **Heartbeat**: 16-byte file whose timestamp decides whether an instance is alive
//! - **Tailing**: delivering only complete lines appended since the last poll
//! - **Live session**: a short-lived tail opened and closed by world log transitions
//! - **Scheduler**: owns every tracker and fans each tick's deltas out to subscribers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tailwatch::{InstanceSubscriber, JsonObject, Scheduler, WatchConfig};
//!
//! struct Printer;
//!
//! impl InstanceSubscriber for Printer {
//!     fn on_new_instance(&self, instance: &JsonObject, is_new: bool) {
//!         println!("instance {instance:?} (new: {is_new})");
//!     }
//!     fn on_instance_closed(&self, instance: &JsonObject) {
//!         println!("closed {instance:?}");
//!     }
//! }
//!
//! # fn main() -> tailwatch::WatchResult<()> {
//! let mut scheduler = Scheduler::new(WatchConfig::with_root("/tmp/hermes"));
//! scheduler.subscribe_instances(Arc::new(Printer), Duration::from_millis(100), None)?;
//! scheduler.start()?;
//! // ...
//! scheduler.stop();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod descriptor;
pub mod error;
pub mod path_ref;
pub mod paths;
pub mod sink;
pub mod time;

// Discovery
pub mod heartbeat;
pub mod instance;
pub mod registry;

// Tailing and dispatch
pub mod scheduler;
pub mod tail;
pub mod tracker;

// Re-export primary types at crate root for convenience
pub use config::WatchConfig;
pub use descriptor::{InstanceInfo, JsonObject, ModRecord};
pub use error::{ContractError, ExecutorError, ReadError, WatchError, WatchResult};
pub use instance::{Instance, InstanceHandle, InstanceId};
pub use path_ref::RelativePathRef;
pub use registry::{InstanceRegistry, RegistryDelta};
pub use sink::{ErrorSink, TracingSink};
pub use time::Millis;

pub use scheduler::{
    Executor, Inline, InstanceSubscriber, Job, LiveSessionSubscriber, Phase, Scheduler, StateSubscriber,
    SubscriberId, WorkerPool, WorldLogSubscriber,
};
pub use tail::{ConditionalFileReader, IncrementalLogReader, JsonLogReader, TailLine};
pub use tracker::{EphemeralSessionTracker, LogSessionTracker, StateTracker};
