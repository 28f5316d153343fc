//! The bounded queue and the threads draining it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use crate::error::{HandlerError, PoolError, Result};
use crate::settings::QueueSettings;
use crate::status::{PoolCounters, PoolStatus, WorkerMonitor};

/// How often an idle worker wakes up to look at the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often shutdown checks whether the workers have finished draining
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Items that were queued at shutdown and got processed before the deadline
    pub drained: usize,
    /// Items still queued when the deadline passed; they are dropped
    pub abandoned: usize,
    /// Workers still inside a handler at the deadline; their threads are detached
    pub detached_workers: usize,
}

/// A fixed-capacity queue drained by a fixed number of worker threads.
pub struct WorkerPool<T: Send + 'static> {
    name: String,
    settings: QueueSettings,
    /// `None` once shutdown has started
    sender: RwLock<Option<Sender<T>>>,
    receiver: Receiver<T>,
    stop: Arc<AtomicBool>,
    monitors: Vec<Arc<WorkerMonitor>>,
    counters: Arc<PoolCounters>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Validate the settings and spawn the workers.
    ///
    /// # Arguments
    /// * `name` - Pool name used in thread names and log lines
    /// * `settings` - Worker count, queue capacity and shutdown timeout
    /// * `handler` - Called once per item on a worker thread; an `Err` or a
    ///   panic is logged and counted as a failure
    ///
    /// # Returns
    /// The running pool, or an error if the settings are invalid or a thread
    /// could not be spawned.
    pub fn start<H>(name: impl Into<String>, settings: QueueSettings, handler: H) -> Result<Self>
    where
        H: Fn(T) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        settings.validate(&name)?;

        let (sender, receiver) = channel::bounded(settings.queue_size);
        let handler = Arc::new(handler);
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(PoolCounters::default());

        let mut monitors = Vec::with_capacity(settings.workers);
        let mut handles = Vec::with_capacity(settings.workers);

        for index in 0..settings.workers {
            let monitor = Arc::new(WorkerMonitor::new());
            let worker = Worker {
                pool: name.clone(),
                index,
                receiver: receiver.clone(),
                handler: Arc::clone(&handler),
                stop: Arc::clone(&stop),
                monitor: Arc::clone(&monitor),
                counters: Arc::clone(&counters),
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => {
                    monitors.push(monitor);
                    handles.push(handle);
                }
                Err(source) => {
                    stop.store(true, Ordering::Release);
                    return Err(PoolError::Spawn {
                        pool: name,
                        index,
                        source,
                    });
                }
            }
        }

        tracing::debug!(
            "Started pool '{}' with {} workers and queue size {}",
            name,
            settings.workers,
            settings.queue_size
        );

        Ok(Self {
            name,
            settings,
            sender: RwLock::new(Some(sender)),
            receiver,
            stop,
            monitors,
            counters,
            handles: Mutex::new(handles),
        })
    }

    /// Offer an item to the queue without blocking.
    ///
    /// Returns `false` if the queue is full or the pool is shutting down. A
    /// full queue is logged as an error naming the tunables to raise.
    pub fn submit(&self, item: T) -> bool {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            PoolCounters::incr(&self.counters.rejected);
            tracing::debug!("Pool '{}' is shut down, rejecting item", self.name);
            return false;
        };

        match sender.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                PoolCounters::incr(&self.counters.rejected);
                tracing::error!(
                    "Queue of pool '{}' is full ({} items), dropping event; consider increasing {} or {}",
                    self.name,
                    self.settings.queue_size,
                    self.settings.queue_size_key(),
                    self.settings.workers_key()
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                PoolCounters::incr(&self.counters.rejected);
                tracing::error!("All workers of pool '{}' are gone, dropping event", self.name);
                false
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Number of items waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the pool still accepts items
    pub fn is_running(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Snapshot of queue depth, counters and per-worker liveness
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            name: self.name.clone(),
            queue_len: self.receiver.len(),
            capacity: self.settings.queue_size,
            workers: self.monitors.iter().map(|m| m.status()).collect(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting items, drain within the configured timeout, then stop
    /// the workers.
    ///
    /// Calling this more than once is harmless; later calls return an empty
    /// report.
    pub fn shutdown(&self) -> ShutdownReport {
        let Some(sender) = self.sender.write().take() else {
            return ShutdownReport::default();
        };
        let queued = self.receiver.len();
        // Workers see a disconnected channel once the queue is empty
        drop(sender);

        let handles = std::mem::take(&mut *self.handles.lock());
        let deadline = Instant::now() + self.settings.shutdown_timeout;
        while Instant::now() < deadline && handles.iter().any(|h| !h.is_finished()) {
            thread::sleep(DRAIN_CHECK_INTERVAL);
        }

        self.stop.store(true, Ordering::Release);
        let abandoned = self.receiver.try_iter().count();

        let mut detached_workers = 0;
        for handle in handles {
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::warn!("A worker of pool '{}' terminated abnormally", self.name);
                }
            } else {
                detached_workers += 1;
            }
        }

        let report = ShutdownReport {
            drained: queued.saturating_sub(abandoned),
            abandoned,
            detached_workers,
        };

        if report.abandoned > 0 || report.detached_workers > 0 {
            tracing::warn!(
                "Pool '{}' force-stopped after {:?}: {} items abandoned, {} workers still busy",
                self.name,
                self.settings.shutdown_timeout,
                report.abandoned,
                report.detached_workers
            );
        } else {
            tracing::debug!("Pool '{}' stopped, {} items drained", self.name, report.drained);
        }

        report
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("queue_len", &self.receiver.len())
            .finish()
    }
}

/// State owned by one worker thread.
struct Worker<T, H> {
    pool: String,
    index: usize,
    receiver: Receiver<T>,
    handler: Arc<H>,
    stop: Arc<AtomicBool>,
    monitor: Arc<WorkerMonitor>,
    counters: Arc<PoolCounters>,
}

impl<T, H> Worker<T, H>
where
    T: Send + 'static,
    H: Fn(T) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    fn run(self) {
        tracing::trace!("Worker {} of pool '{}' started", self.index, self.pool);

        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(item) => self.process(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::trace!("Worker {} of pool '{}' stopped", self.index, self.pool);
    }

    fn process(&self, item: T) {
        self.monitor.begin();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (*self.handler)(item)));
        self.monitor.end();

        PoolCounters::incr(&self.counters.processed);
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                PoolCounters::incr(&self.counters.failed);
                tracing::error!("Handler of pool '{}' failed: {}", self.pool, e);
            }
            Err(payload) => {
                PoolCounters::incr(&self.counters.failed);
                tracing::error!(
                    "Handler of pool '{}' panicked: {}",
                    self.pool,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = WorkerPool::start("bad", QueueSettings::new(0, 10), |_: u8| Ok(()));
        assert!(matches!(result, Err(PoolError::InvalidSettings { .. })));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = WorkerPool::start("twice", QueueSettings::new(1, 4), |_: u8| Ok(())).unwrap();
        assert!(pool.is_running());
        pool.shutdown();
        assert!(!pool.is_running());
        assert_eq!(pool.shutdown(), ShutdownReport::default());
        assert!(!pool.submit(1));
        assert_eq!(pool.status().rejected, 1);
    }
}
