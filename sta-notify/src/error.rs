use broker::BrokerError;
use sta_model::{EntityType, FormatError, PathError, PersistenceError, QueryError};
use thiserror::Error;
use worker_pool::PoolError;

/// Reasons a topic cannot become a subscription.
///
/// The text is sent back to the subscribing client as the reason of the
/// negative acknowledgement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionRejection {
    /// First path segment is not a version we serve
    #[error("Topic '{0}' does not start with a known version segment")]
    UnknownVersion(String),

    /// MQTT wildcards cannot be mapped onto a resource path
    #[error("Topic '{0}' contains wildcards")]
    Wildcard(String),

    /// Path could not be decoded
    #[error("Invalid path in topic '{topic}': {source}")]
    InvalidPath {
        topic: String,
        #[source]
        source: PathError,
    },

    /// Query options could not be decoded
    #[error("Invalid query in topic '{topic}': {source}")]
    InvalidQuery {
        topic: String,
        #[source]
        source: QueryError,
    },

    /// Query option that makes no sense for a stream of changes
    #[error("Query option '{option}' is not allowed when subscribing to {target}")]
    OptionNotAllowed { option: String, target: String },

    /// `$filter` given while the server does not allow it
    #[error("$filter in subscriptions is disabled on this server")]
    FilterNotAllowed,

    /// `$filter` present but empty
    #[error("$filter in topic '{0}' is empty")]
    EmptyFilter(String),

    /// `$select` or `$expand` names something the entity type does not have
    #[error("'{name}' in {option} is not a property of {entity_type}")]
    UnknownProperty {
        option: &'static str,
        name: String,
        entity_type: EntityType,
    },
}

/// Errors of the notification subsystem
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A registry key that names no implementation
    #[error("Unknown {kind} '{key}', expected one of: {known}")]
    UnknownImplementation {
        kind: &'static str,
        key: String,
        known: String,
    },

    /// Subscription request refused
    #[error(transparent)]
    Rejected(#[from] SubscriptionRejection),

    /// Broker client or transport failure
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A worker pool could not be started
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// Rendering a notification failed
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Storage lookup needed for a notification failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Bus message could not be encoded or decoded
    #[error("Bus message encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Operation needs a started component
    #[error("{0} is not running")]
    NotRunning(&'static str),
}

/// Result type for notification operations
pub type Result<T> = std::result::Result<T, NotifyError>;
