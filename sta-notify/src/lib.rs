//! # sta-notify
//!
//! Change notifications for a SensorThings server: clients subscribe to
//! resource paths as broker topics and receive every entity that enters or
//! changes within them.
//!
//! ## Pieces
//!
//! - [`SubscriptionFactory`] turns a topic such as `v1.0/Things(5)/Datastreams`
//!   into a [`Subscription`] or a [`SubscriptionRejection`].
//! - [`SubscriptionIndex`] reference-counts subscriptions per topic and finds
//!   the ones a [`ChangeEvent`](sta_model::ChangeEvent) concerns, answering
//!   subscriptions to the children of one parent with a map lookup.
//! - [`MessageBus`] implementations carry change events from the storage
//!   layer, in process or across nodes through a broker.
//! - [`NotificationDispatcher`] ties it together: it follows client
//!   subscriptions reported by the broker, matches queued events and
//!   publishes the rendered payloads.
//! - [`registry`] selects the bus and broker client by configuration key.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sta_model::{ChangeEvent, Entity, EntityType};
//! use sta_notify::{
//!     create_broker_client, create_message_bus, NotificationDispatcher, NotifyConfig, Services,
//! };
//! # fn services() -> Services { unimplemented!() }
//!
//! # fn main() -> sta_notify::Result<()> {
//! let config = NotifyConfig::default();
//! let bus = create_message_bus(&config.bus)?;
//! bus.start()?;
//! let broker = create_broker_client(&config.broker_client, &config.broker)?;
//! let dispatcher = NotificationDispatcher::start(config, services(), Arc::clone(&bus), broker)?;
//!
//! let datastream = Entity::new(EntityType::Datastream, 1).with_link("Thing", 5);
//! bus.send_change(ChangeEvent::created(datastream));
//!
//! dispatcher.shutdown();
//! bus.stop();
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod index;
pub mod registry;
pub mod services;
pub mod status;
pub mod subscription;

pub use bus::{BusListener, InternalMessageBus, MessageBus, MqttMessageBus};
pub use config::{BusConfig, NotifyConfig};
pub use dispatcher::NotificationDispatcher;
pub use error::{NotifyError, Result, SubscriptionRejection};
pub use index::SubscriptionIndex;
pub use registry::{create_broker_client, create_message_bus, BrokerBinding};
pub use services::Services;
pub use status::{log_status, StatusReporter};
pub use subscription::{
    ChangeMatcher, MatchStrategy, Subscription, SubscriptionFactory, SubscriptionKey,
};
