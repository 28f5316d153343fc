//! Error types for the worker-pool crate.

/// Error returned by a pool handler for a single item.
///
/// The pool only logs it; it never travels back to the producer.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building or running a worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid queue settings provided
    #[error("Invalid settings for pool '{pool}': {reason}")]
    InvalidSettings {
        /// Name of the pool being configured
        pool: String,
        /// What is wrong with the settings
        reason: String,
    },

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker {index} for pool '{pool}': {source}")]
    Spawn {
        /// Name of the pool
        pool: String,
        /// Index of the worker that failed to start
        index: usize,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using PoolError.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        let error = PoolError::InvalidSettings {
            pool: "bus-changed".to_string(),
            reason: "queue_size must be greater than 0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid settings for pool 'bus-changed': queue_size must be greater than 0"
        );

        let error = PoolError::Spawn {
            pool: "bus-changed".to_string(),
            index: 3,
            source: std::io::Error::new(std::io::ErrorKind::Other, "no threads left"),
        };
        assert!(error.to_string().contains("worker 3"));
        assert!(error.to_string().contains("no threads left"));
    }
}
