//! Executors decide which thread runs a subscriber callback.
//!
//! Without an executor a callback runs on the scheduler thread, and a slow
//! subscriber delays the next tick. A [`WorkerPool`] moves callbacks onto its
//! own threads through a bounded queue; when the queue is full the job is
//! refused rather than blocking the scheduler.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::{ContractError, ExecutorError, WatchResult};

/// A unit of subscriber work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs delivery jobs.
pub trait Executor: Send + Sync {
    /// Accepts a job for execution. Must not block.
    ///
    /// # Errors
    ///
    /// Returns an `ExecutorError` if the job cannot be accepted; the job is
    /// dropped.
    fn execute(&self, job: Job) -> Result<(), ExecutorError>;
}

/// Runs each job on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        job();
        Ok(())
    }
}

/// Fixed set of named threads draining a bounded job queue.
#[derive(Debug)]
pub struct WorkerPool {
    tx: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Spawns `workers` threads named `tailwatch-{name}-{idx}`.
    ///
    /// # Errors
    ///
    /// Returns `ContractError::Spawn` if a thread cannot be spawned. Threads
    /// spawned before the failure are shut down.
    pub fn new(name: &str, workers: usize, queue_capacity: usize) -> WatchResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let pool = Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(Vec::with_capacity(workers)),
            queue_capacity,
        };
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("tailwatch-{name}-{idx}"))
                .spawn(move || worker_loop(&rx));
            match spawned {
                Ok(handle) => pool.lock_workers().push(handle),
                Err(source) => {
                    pool.shutdown();
                    return Err(ContractError::Spawn { source }.into());
                }
            }
        }
        Ok(pool)
    }

    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Closes the queue, lets workers drain what was already accepted, and
    /// joins them. Later jobs are refused. Idempotent.
    pub fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());
        let handles = std::mem::take(&mut *self.lock_workers());
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) -> Result<(), ExecutorError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(ExecutorError::Disconnected);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutorError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(ExecutorError::Disconnected),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        // A panicking subscriber must not take the worker down with it.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("subscriber callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn inline_runs_on_caller() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        Inline
            .execute(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_runs_jobs_on_named_threads() {
        let pool = WorkerPool::new("test", 2, 8).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            }))
            .unwrap();
        }
        for _ in 0..4 {
            let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
            assert!(name.starts_with("tailwatch-test-"));
        }
    }

    #[test]
    fn full_queue_refuses_without_blocking() {
        let pool = WorkerPool::new("full", 1, 1).unwrap();
        let (block_tx, block_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        pool.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = block_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Worker is busy: one job fits in the queue, the next is refused.
        pool.execute(Box::new(|| {})).unwrap();
        let err = pool.execute(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, ExecutorError::QueueFull { capacity: 1 }));

        drop(block_tx);
        pool.shutdown();
    }

    #[test]
    fn shutdown_drains_then_refuses() {
        let pool = WorkerPool::new("drain", 1, 16).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let r = Arc::clone(&ran);
            pool.execute(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
        assert!(matches!(pool.execute(Box::new(|| {})), Err(ExecutorError::Disconnected)));
        pool.shutdown();
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let pool = WorkerPool::new("panic", 1, 4).unwrap();
        pool.execute(Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
