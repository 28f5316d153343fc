//! # broker
//!
//! Publish/subscribe plumbing for the notification subsystem.
//!
//! - [`BrokerClient`] / [`BrokerListener`]: the seam to a concrete broker.
//! - [`EmbeddedBroker`]: an in-process broker that reports remote clients'
//!   subscriptions to the server and lets it refuse them.
//! - [`MqttClient`]: a `rumqttc` connection to an external MQTT broker.
//! - [`BrokerTransport`]: owns one client, queues publishes and incoming
//!   messages on worker pools, and keeps retrying the connection from a
//!   maintenance task.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use broker::{BrokerListener, BrokerSettings, BrokerTransport, EmbeddedBroker, QoS};
//!
//! struct Ignore;
//! impl BrokerListener for Ignore {
//!     fn on_message(&self, _topic: &str, _payload: &[u8]) {}
//! }
//!
//! let broker = EmbeddedBroker::new();
//! let transport = BrokerTransport::start(
//!     "example",
//!     Arc::new(broker.clone()),
//!     BrokerSettings::default(),
//!     Arc::new(Ignore),
//! )
//! .unwrap();
//!
//! let client = broker.connect_client("viewer").unwrap();
//! client.subscribe("v1.0/Things").unwrap();
//! assert!(transport.publish("v1.0/Things", b"{}".to_vec(), QoS::AtLeastOnce));
//! assert!(client.recv_timeout(Duration::from_secs(2)).is_some());
//! transport.shutdown();
//! ```

pub mod client;
pub mod embedded;
pub mod error;
pub mod mqtt;
pub mod settings;
pub mod topic;
pub mod transport;

pub use client::{BrokerClient, BrokerListener, BrokerMessage, QoS};
pub use embedded::{ClientSession, EmbeddedBroker};
pub use error::{BrokerError, Result};
pub use mqtt::MqttClient;
pub use settings::{generate_client_id, BrokerSettings};
pub use topic::{is_valid_filter, topic_matches};
pub use transport::BrokerTransport;
