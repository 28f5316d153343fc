//! Periodic status logging of every queue in the notification subsystem.
//!
//! The reporter runs on its own thread with a single-threaded runtime and
//! logs, per pool, the queue depth, the counters and any worker that has been
//! busy with one item for longer than the configured threshold.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use worker_pool::PoolStatus;

use crate::error::{NotifyError, Result};

/// How long shutdown waits for the reporter thread
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Supplies the statuses to report
pub type StatusSource = Arc<dyn Fn() -> Vec<PoolStatus> + Send + Sync>;

/// Log one status line per pool and a warning per stuck worker.
///
/// # Returns
/// The number of stuck workers found
pub fn log_status(statuses: &[PoolStatus], stuck_threshold: Duration) -> usize {
    let mut stuck = 0;
    for status in statuses {
        tracing::info!("{}", status);
        for index in status.stuck_workers(stuck_threshold) {
            stuck += 1;
            let busy_for = status.workers[index].busy_for().unwrap_or_default();
            tracing::warn!(
                "Worker {} of pool '{}' has been busy for {:?}, it may be stuck",
                index,
                status.name,
                busy_for
            );
        }
    }
    stuck
}

/// Background task logging pool statuses at a fixed interval
pub struct StatusReporter {
    shutdown_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl StatusReporter {
    /// Start reporting every `period`.
    ///
    /// # Returns
    /// * `Ok(None)` if `period` is zero, which disables reporting
    /// * `Ok(Some(reporter))` otherwise
    pub fn spawn(
        period: Duration,
        stuck_threshold: Duration,
        source: StatusSource,
    ) -> Result<Option<Self>> {
        if period.is_zero() {
            tracing::debug!("Status reporting disabled");
            return Ok(None);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let thread = thread::Builder::new()
            .name("notify-status".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!("Failed to create runtime for status reporter: {}", e);
                        return;
                    }
                };

                rt.block_on(async move {
                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // The first tick completes immediately
                    ticker.tick().await;
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                log_status(&source(), stuck_threshold);
                            }
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                });
            })
            .map_err(|e| {
                NotifyError::Configuration(format!("failed to spawn status reporter: {}", e))
            })?;

        tracing::info!("Status reporter started, logging every {:?}", period);
        Ok(Some(Self {
            shutdown_tx,
            thread,
        }))
    }

    /// Stop the reporter, waiting up to five seconds for its thread
    pub fn shutdown(self) {
        let _ = self.shutdown_tx.try_send(());

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        while !self.thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        if self.thread.is_finished() {
            let _ = self.thread.join();
        } else {
            tracing::warn!("Status reporter did not stop within {:?}", SHUTDOWN_TIMEOUT);
        }
    }
}
