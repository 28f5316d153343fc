//! Tunables for a single queue/pool pair.

use std::time::Duration;

use serde::Deserialize;

use crate::error::PoolError;

/// Size and thread count of one bounded queue and the pool draining it.
///
/// Every queue in the system is tuned independently, so each one carries its
/// own `QueueSettings`. The `key` is the configuration path of this pair and
/// is quoted in the "queue full" log line so operators know what to raise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Number of worker threads draining the queue
    /// Default: 2
    pub workers: usize,

    /// Maximum number of items waiting in the queue
    /// Default: 100
    pub queue_size: usize,

    /// How long shutdown waits for the queue to drain
    /// Default: 5 seconds
    #[serde(with = "duration_millis", rename = "shutdown_timeout_ms")]
    pub shutdown_timeout: Duration,

    /// Configuration key of this pair, e.g. `notify.changed_queue`
    #[serde(skip)]
    pub key: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_size: 100,
            shutdown_timeout: Duration::from_secs(5),
            key: String::new(),
        }
    }
}

impl QueueSettings {
    /// Create settings with the given worker count and queue capacity
    pub fn new(workers: usize, queue_size: usize) -> Self {
        Self {
            workers,
            queue_size,
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Name of the worker-count tunable, for log messages
    pub fn workers_key(&self) -> String {
        self.qualified("workers")
    }

    /// Name of the queue-size tunable, for log messages
    pub fn queue_size_key(&self) -> String {
        self.qualified("queue_size")
    }

    fn qualified(&self, field: &str) -> String {
        if self.key.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", self.key, field)
        }
    }

    /// Validate the settings for the named pool
    pub fn validate(&self, pool: &str) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidSettings {
                pool: pool.to_string(),
                reason: format!("{} must be greater than 0", self.workers_key()),
            });
        }

        if self.queue_size == 0 {
            return Err(PoolError::InvalidSettings {
                pool: pool.to_string(),
                reason: format!("{} must be greater than 0", self.queue_size_key()),
            });
        }

        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
