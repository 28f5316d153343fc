//! Error types for the broker crate.

use worker_pool::PoolError;

/// Errors that can occur while talking to a broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The client has no live connection
    #[error("Not connected to broker: {0}")]
    NotConnected(String),

    /// Establishing the connection failed or timed out
    #[error("Failed to connect to broker at {url}: {reason}")]
    ConnectFailed {
        /// Broker endpoint
        url: String,
        /// What went wrong
        reason: String,
    },

    /// A publish request could not be handed to the broker
    #[error("Failed to publish on '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    /// A subscribe or unsubscribe request could not be handed to the broker
    #[error("Failed to change subscription '{filter}': {reason}")]
    SubscriptionFailed { filter: String, reason: String },

    /// The server refused a client subscription (negative acknowledgement)
    #[error("Subscription to '{filter}' rejected: {reason}")]
    SubscriptionRejected { filter: String, reason: String },

    /// A client with this identifier is already attached
    #[error("Client '{0}' is already connected")]
    DuplicateClient(String),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Worker pool could not be started
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// An error occurred during shutdown
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Convenience type alias for Results using BrokerError.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let error = BrokerError::ConnectFailed {
            url: "tcp://localhost:1883".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to connect to broker at tcp://localhost:1883: connection refused"
        );

        let error = BrokerError::SubscriptionRejected {
            filter: "v1.0/Things?$top=1".to_string(),
            reason: "$top is not allowed".to_string(),
        };
        assert!(error.to_string().contains("rejected"));
    }

    #[test]
    fn test_pool_error_conversion() {
        let pool_error = PoolError::InvalidSettings {
            pool: "broker-send".to_string(),
            reason: "workers must be greater than 0".to_string(),
        };
        let error: BrokerError = pool_error.into();
        assert!(matches!(error, BrokerError::Pool(_)));
    }
}
