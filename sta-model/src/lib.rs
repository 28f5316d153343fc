//! SensorThings data model shared by the notification crates.
//!
//! This crate holds the vocabulary every other crate speaks:
//!
//! - [`EntityType`], [`NavigationProperty`] and [`Entity`]: the entity model,
//!   including which relations are to-one and can therefore index a
//!   subscription by parent key.
//! - [`ChangeEvent`]: what the storage layer emits after a mutation.
//! - [`ResourcePath`] and [`Query`]: decoded request and topic paths.
//! - The service interfaces in [`service`]: path parsing, persistence,
//!   formatting and request execution. [`DefaultPathParser`] and
//!   [`JsonFormatter`] are ready-made implementations.
//!
//! ```rust
//! use sta_model::{DefaultPathParser, PathParser, Version};
//!
//! let path = DefaultPathParser.parse_path(Version::V1_0, "Things(5)/Datastreams").unwrap();
//! assert_eq!(path.to_string(), "v1.0/Things(5)/Datastreams");
//! ```

pub mod entity;
pub mod error;
pub mod event;
pub mod format;
pub mod path;
pub mod query;
pub mod service;
pub mod version;

pub use entity::{Entity, EntityId, EntityType, Expanded, NavigationProperty};
pub use error::{FormatError, PathError, PersistenceError, QueryError};
pub use event::{ChangeEvent, EventType};
pub use format::JsonFormatter;
pub use path::{DefaultPathParser, PathElement, ResourcePath};
pub use query::Query;
pub use service::{
    EntityFormatter, PathParser, PersistenceManager, RequestExecutor, RequestType,
    ServiceRequest, ServiceResponse,
};
pub use version::Version;
