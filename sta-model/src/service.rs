//! Interfaces of the services the notification subsystem relies on.
//!
//! Path decoding, filter evaluation, payload rendering and request execution
//! all live outside the notification pipeline. The pipeline only sees these
//! traits, so a server wires in its real implementations and tests wire in
//! small in-memory ones.

use std::fmt;

use crate::entity::Entity;
use crate::error::{FormatError, PathError, PersistenceError};
use crate::path::ResourcePath;
use crate::query::Query;
use crate::version::Version;

/// Turns the path part of a URL or topic into a [`ResourcePath`]
pub trait PathParser: Send + Sync {
    /// # Arguments
    /// * `version` - Protocol version taken from the first segment
    /// * `path` - Everything after the version segment, without query options
    fn parse_path(&self, version: Version, path: &str) -> Result<ResourcePath, PathError>;
}

/// Storage access needed while matching and rendering change events
pub trait PersistenceManager: Send + Sync {
    /// Whether `entity` is part of the result of `path` with `query` applied.
    ///
    /// Used for subscriptions whose interest cannot be decided in memory,
    /// e.g. those with a `$filter` or a path of more than one hop.
    fn entity_matches(
        &self,
        path: &ResourcePath,
        query: &Query,
        entity: &Entity,
    ) -> Result<bool, PersistenceError>;

    /// Return a copy of `entity` with the relations named in `query.expand`
    /// loaded into [`Entity::expanded`]
    fn load_expanded(&self, entity: &Entity, query: &Query) -> Result<Entity, PersistenceError>;
}

/// Renders entities into wire payloads
pub trait EntityFormatter: Send + Sync {
    /// Render an entity the way a GET of its path with `query` would
    fn format_entity(&self, entity: &Entity, query: &Query) -> Result<String, FormatError>;

    /// Render only the value of one property
    fn format_property(&self, entity: &Entity, property: &str) -> Result<String, FormatError>;
}

/// Kind of service request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestType::Create => "create",
            RequestType::Read => "read",
            RequestType::Update => "update",
            RequestType::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A request handed to the service layer
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub request_type: RequestType,
    pub version: Version,
    /// Target path without the version prefix, e.g. `Datastreams(1)/Observations`
    pub path: String,
    /// JSON body, as sent by the client
    pub body: String,
}

impl ServiceRequest {
    pub fn create(version: Version, path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Create,
            version,
            path: path.into(),
            body: body.into(),
        }
    }
}

/// Outcome of a [`ServiceRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// HTTP-style status code
    pub code: u16,
    pub message: Option<String>,
    pub body: Option<String>,
}

impl ServiceResponse {
    pub fn success(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            message: None,
            body: Some(body.into()),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            body: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Executes service requests, e.g. entity creation from an inbound message
pub trait RequestExecutor: Send + Sync {
    fn execute(&self, request: ServiceRequest) -> ServiceResponse;
}
