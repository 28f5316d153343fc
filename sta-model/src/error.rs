use thiserror::Error;

use crate::entity::EntityType;

/// Errors raised while decoding a resource path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// No path segments after the version
    #[error("Empty resource path")]
    Empty,

    /// Version segment missing or not one we serve
    #[error("Unknown or missing version segment '{0}'")]
    UnknownVersion(String),

    /// First segment is not an entity set
    #[error("Unknown entity set '{0}'")]
    UnknownEntitySet(String),

    /// Segment is neither a navigation property nor a property of the entity type
    #[error("'{segment}' is not a property or navigation property of {entity_type}")]
    UnknownSegment {
        segment: String,
        entity_type: EntityType,
    },

    /// Primary key literal could not be parsed
    #[error("Invalid entity id '{0}'")]
    InvalidId(String),

    /// A to-one navigation property was given an id
    #[error("Navigation property '{0}' leads to a single entity and takes no id")]
    UnexpectedId(String),

    /// Navigating away from an entity set that was not narrowed to one entity
    #[error("Cannot navigate from collection '{0}' without an entity id")]
    NavigationFromCollection(String),

    /// Anything after a property segment
    #[error("Property '{0}' must be the last path segment")]
    PropertyNotLast(String),
}

/// Errors raised while decoding query options
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Unknown query option '{0}'")]
    UnknownOption(String),

    #[error("Query option '{0}' given more than once")]
    DuplicateOption(String),

    #[error("Invalid value '{value}' for query option '{option}'")]
    InvalidValue { option: String, value: String },
}

/// Errors reported by a persistence backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Unsupported filter expression: {0}")]
    UnsupportedFilter(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors raised while rendering an entity for the wire
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("{entity_type} has no property '{property}'")]
    UnknownProperty {
        entity_type: EntityType,
        property: String,
    },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
