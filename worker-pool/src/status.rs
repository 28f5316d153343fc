//! Liveness and throughput reporting for worker pools.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// What a single worker is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Waiting on the queue
    Idle,
    /// Running the handler for one item since the given instant
    Working { since: Instant },
}

impl WorkerStatus {
    /// How long the current item has been running, if any
    pub fn busy_for(&self) -> Option<Duration> {
        match self {
            WorkerStatus::Idle => None,
            WorkerStatus::Working { since } => Some(since.elapsed()),
        }
    }

    /// Whether the worker has been on the same item for longer than `threshold`
    pub fn is_stuck(&self, threshold: Duration) -> bool {
        self.busy_for().map_or(false, |busy| busy > threshold)
    }
}

/// Shared slot a worker updates around every handler call.
#[derive(Debug)]
pub(crate) struct WorkerMonitor {
    working_since: Mutex<Option<Instant>>,
}

impl WorkerMonitor {
    pub(crate) fn new() -> Self {
        Self {
            working_since: Mutex::new(None),
        }
    }

    pub(crate) fn begin(&self) {
        *self.working_since.lock() = Some(Instant::now());
    }

    pub(crate) fn end(&self) {
        *self.working_since.lock() = None;
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        match *self.working_since.lock() {
            Some(since) => WorkerStatus::Working { since },
            None => WorkerStatus::Idle,
        }
    }
}

/// Counters shared between the pool handle and its workers.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) processed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of a pool
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub name: String,
    pub queue_len: usize,
    pub capacity: usize,
    pub workers: Vec<WorkerStatus>,
    /// Items handled, successfully or not
    pub processed: u64,
    /// Items whose handler returned an error or panicked
    pub failed: u64,
    /// Items refused because the queue was full or the pool was stopping
    pub rejected: u64,
}

impl PoolStatus {
    /// Indices of workers busy with one item for longer than `threshold`
    pub fn stuck_workers(&self, threshold: Duration) -> Vec<usize> {
        self.workers
            .iter()
            .enumerate()
            .filter(|(_, status)| status.is_stuck(threshold))
            .map(|(index, _)| index)
            .collect()
    }

    /// Number of workers currently running a handler
    pub fn busy_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|status| matches!(status, WorkerStatus::Working { .. }))
            .count()
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: queue {}/{}, workers {}/{} busy, processed {}, failed {}, rejected {}",
            self.name,
            self.queue_len,
            self.capacity,
            self.busy_workers(),
            self.workers.len(),
            self.processed,
            self.failed,
            self.rejected
        )
    }
}
