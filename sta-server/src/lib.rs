//! # sta-server
//!
//! A SensorThings server process around the notification pipeline: loads the
//! configuration, installs logging, keeps entities in memory and publishes
//! every change to subscribed broker clients.
//!
//! ```rust,no_run
//! use sta_server::{ServerConfig, StaServer};
//!
//! # fn main() -> sta_server::Result<()> {
//! let server = StaServer::start(ServerConfig::default())?;
//! let viewer = server.embedded_broker().unwrap().connect_client("viewer").unwrap();
//! viewer.subscribe("v1.0/Things").unwrap();
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod service;

pub use config::{Overrides, ServerConfig};
pub use error::{Result, ServerError};
pub use logging::{init_logging, LoggingMode};
pub use memory::MemoryStore;
pub use service::StaServer;
