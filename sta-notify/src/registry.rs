//! Implementations selectable by configuration key.
//!
//! Both tables are fixed at compile time; an unknown key is a configuration
//! error at startup.

use std::sync::Arc;

use broker::{BrokerClient, BrokerSettings, EmbeddedBroker, MqttClient};

use crate::bus::{InternalMessageBus, MessageBus, MqttMessageBus};
use crate::config::BusConfig;
use crate::error::{NotifyError, Result};

/// A broker client plus, for the embedded broker, the handle remote clients
/// attach through
#[derive(Clone)]
pub struct BrokerBinding {
    pub client: Arc<dyn BrokerClient>,
    pub embedded: Option<EmbeddedBroker>,
}

impl BrokerBinding {
    pub fn embedded(broker: EmbeddedBroker) -> Self {
        Self {
            client: Arc::new(broker.clone()),
            embedded: Some(broker),
        }
    }

    pub fn external(client: Arc<dyn BrokerClient>) -> Self {
        Self {
            client,
            embedded: None,
        }
    }
}

impl std::fmt::Debug for BrokerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBinding")
            .field("embedded", &self.embedded.is_some())
            .finish_non_exhaustive()
    }
}

pub type BrokerClientConstructor = fn(&BrokerSettings) -> Result<BrokerBinding>;

pub type MessageBusConstructor = fn(&BusConfig) -> Result<Arc<dyn MessageBus>>;

/// Broker clients by configuration key
pub const BROKER_CLIENTS: &[(&str, BrokerClientConstructor)] =
    &[("embedded", embedded_broker), ("mqtt", mqtt_broker)];

/// Message buses by configuration key
pub const MESSAGE_BUSES: &[(&str, MessageBusConstructor)] =
    &[("internal", internal_bus), ("mqtt", mqtt_bus)];

fn embedded_broker(_settings: &BrokerSettings) -> Result<BrokerBinding> {
    Ok(BrokerBinding::embedded(EmbeddedBroker::new()))
}

fn mqtt_broker(settings: &BrokerSettings) -> Result<BrokerBinding> {
    Ok(BrokerBinding::external(Arc::new(MqttClient::new(settings.clone())?)))
}

fn internal_bus(config: &BusConfig) -> Result<Arc<dyn MessageBus>> {
    Ok(Arc::new(InternalMessageBus::new(config.queue.clone())))
}

fn mqtt_bus(config: &BusConfig) -> Result<Arc<dyn MessageBus>> {
    let client = MqttClient::new(config.broker.clone())?;
    Ok(Arc::new(MqttMessageBus::new(config.broker.clone(), Arc::new(client))))
}

fn lookup<T: Copy>(table: &[(&str, T)], kind: &'static str, key: &str) -> Result<T> {
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, constructor)| *constructor)
        .ok_or_else(|| NotifyError::UnknownImplementation {
            kind,
            key: key.to_string(),
            known: table
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Build the broker client registered under `key`
pub fn create_broker_client(key: &str, settings: &BrokerSettings) -> Result<BrokerBinding> {
    let constructor = lookup(BROKER_CLIENTS, "broker client", key)?;
    tracing::debug!("Creating broker client '{}'", key);
    constructor(settings)
}

/// Build the message bus registered under `config.kind`
pub fn create_message_bus(config: &BusConfig) -> Result<Arc<dyn MessageBus>> {
    let constructor = lookup(MESSAGE_BUSES, "message bus", &config.kind)?;
    tracing::debug!("Creating message bus '{}'", config.kind);
    constructor(config)
}
