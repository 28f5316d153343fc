//! Configuration of the notification subsystem.

use std::time::Duration;

use broker::{BrokerSettings, QoS};
use serde::{Deserialize, Deserializer};
use sta_model::Version;
use worker_pool::QueueSettings;

use crate::error::{NotifyError, Result};

/// Message bus selection and tunables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Registry key of the bus implementation, `internal` or `mqtt`
    /// Default: "internal"
    pub kind: String,

    /// Queue of the internal bus
    pub queue: QueueSettings,

    /// Connection of the MQTT bus. Its send queue carries outgoing changes,
    /// its receive queue incoming ones.
    pub broker: BrokerSettings,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: "internal".to_string(),
            queue: QueueSettings::new(2, 100),
            broker: BrokerSettings::default(),
        }
        .with_default_keys()
    }
}

impl BusConfig {
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_queue(mut self, queue: QueueSettings) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_broker(mut self, broker: BrokerSettings) -> Self {
        self.broker = broker;
        self
    }

    /// Set the configuration keys quoted in "queue full" log lines
    pub fn with_default_keys(mut self) -> Self {
        self.queue.key = "bus.queue".to_string();
        self.broker = self.broker.with_config_prefix("bus.broker");
        self
    }
}

/// Settings of the notification dispatcher and the broker it publishes to.
///
/// All durations are given in seconds in configuration files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Master switch. When off, no queue is started and no broker contacted.
    /// Default: true
    pub enabled: bool,

    /// Accept `$filter` in entity set subscriptions
    /// Default: false
    pub allow_filter_in_subscriptions: bool,

    /// Protocol versions for which delete events are published
    /// Default: none
    pub publish_deletes: Vec<Version>,

    /// Treat messages published by clients on an entity set topic as create
    /// requests
    /// Default: true
    pub inbound_creates: bool,

    /// QoS of published notifications
    /// Default: 1
    pub qos: QoS,

    /// Period of the status log, zero disables it
    /// Default: 300 seconds
    #[serde(with = "duration_secs")]
    pub status_log_interval: Duration,

    /// A worker busy on one item for longer than this is reported as stuck
    /// Default: 30 seconds
    #[serde(with = "duration_secs")]
    pub stuck_worker_threshold: Duration,

    /// Change events waiting to be matched against subscriptions
    pub changed_queue: QueueSettings,

    /// Inbound create requests waiting to be executed
    pub create_queue: QueueSettings,

    /// Registry key of the broker client, `embedded` or `mqtt`
    /// Default: "embedded"
    pub broker_client: String,

    /// Connection and queues of the notification broker
    pub broker: BrokerSettings,

    pub bus: BusConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_filter_in_subscriptions: false,
            publish_deletes: Vec::new(),
            inbound_creates: true,
            qos: QoS::AtLeastOnce,
            status_log_interval: Duration::from_secs(300),
            stuck_worker_threshold: Duration::from_secs(30),
            changed_queue: QueueSettings::new(2, 100),
            create_queue: QueueSettings::new(2, 100),
            broker_client: "embedded".to_string(),
            broker: BrokerSettings::default(),
            bus: BusConfig::default(),
        }
        .with_default_keys()
    }
}

impl NotifyConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_filter_in_subscriptions(mut self, allow: bool) -> Self {
        self.allow_filter_in_subscriptions = allow;
        self
    }

    pub fn with_delete_publishing(mut self, version: Version) -> Self {
        if !self.publish_deletes.contains(&version) {
            self.publish_deletes.push(version);
        }
        self
    }

    pub fn with_inbound_creates(mut self, enabled: bool) -> Self {
        self.inbound_creates = enabled;
        self
    }

    pub fn with_status_log_interval(mut self, interval: Duration) -> Self {
        self.status_log_interval = interval;
        self
    }

    pub fn with_stuck_worker_threshold(mut self, threshold: Duration) -> Self {
        self.stuck_worker_threshold = threshold;
        self
    }

    pub fn with_changed_queue(mut self, queue: QueueSettings) -> Self {
        self.changed_queue = queue;
        self.with_default_keys()
    }

    pub fn with_create_queue(mut self, queue: QueueSettings) -> Self {
        self.create_queue = queue;
        self.with_default_keys()
    }

    pub fn with_broker_client(mut self, kind: impl Into<String>) -> Self {
        self.broker_client = kind.into();
        self
    }

    pub fn with_broker(mut self, broker: BrokerSettings) -> Self {
        self.broker = broker;
        self.with_default_keys()
    }

    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus.with_default_keys();
        self
    }

    /// Whether delete events are published to subscribers of `version`
    pub fn publishes_deletes(&self, version: Version) -> bool {
        self.publish_deletes.contains(&version)
    }

    /// Set the configuration keys quoted in "queue full" log lines.
    ///
    /// Keys are not part of the file format, so call this after loading a
    /// configuration file.
    pub fn with_default_keys(mut self) -> Self {
        self.changed_queue.key = "notify.changed_queue".to_string();
        self.create_queue.key = "notify.create_queue".to_string();
        self.broker = self.broker.with_config_prefix("notify.broker");
        self.bus = self.bus.with_default_keys();
        self
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Ok(())` if the configuration is usable
    /// * `Err(NotifyError::Configuration)` naming the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.stuck_worker_threshold.is_zero() {
            return Err(NotifyError::Configuration(
                "stuck_worker_threshold must be greater than 0".to_string(),
            ));
        }

        let queue_error = |e: worker_pool::PoolError| NotifyError::Configuration(e.to_string());
        self.changed_queue.validate("notify-changed").map_err(queue_error)?;
        self.create_queue.validate("notify-create").map_err(queue_error)?;
        self.bus.queue.validate("bus").map_err(queue_error)?;

        self.broker
            .validate()
            .map_err(|e| NotifyError::Configuration(format!("notify.broker: {}", e)))?;

        if self.bus.kind == "mqtt" {
            self.bus
                .broker
                .validate()
                .map_err(|e| NotifyError::Configuration(format!("bus.broker: {}", e)))?;
            if self.bus.broker.client_id == self.broker.client_id {
                return Err(NotifyError::Configuration(format!(
                    "bus.broker.client_id and notify.broker.client_id must differ, both are '{}'",
                    self.broker.client_id
                )));
            }
        }

        Ok(())
    }
}

mod duration_secs {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NotifyConfig::default();
        assert!(config.enabled);
        assert!(!config.allow_filter_in_subscriptions);
        assert!(!config.publishes_deletes(Version::V1_0));
        assert!(!config.publishes_deletes(Version::V1_1));
        assert_eq!(config.changed_queue.queue_size_key(), "notify.changed_queue.queue_size");
        assert_eq!(config.bus.queue.workers_key(), "bus.queue.workers");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delete_publishing_is_per_version() {
        let config = NotifyConfig::default()
            .with_delete_publishing(Version::V1_1)
            .with_delete_publishing(Version::V1_1);
        assert_eq!(config.publish_deletes, vec![Version::V1_1]);
        assert!(config.publishes_deletes(Version::V1_1));
        assert!(!config.publishes_deletes(Version::V1_0));
    }

    #[test]
    fn test_invalid_queue_rejected() {
        let config = NotifyConfig::default().with_changed_queue(QueueSettings::new(0, 10));
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("notify.changed_queue.workers"));
    }

    #[test]
    fn test_mqtt_bus_needs_distinct_client_id() {
        let broker = BrokerSettings::default().with_client_id("node-1");
        let config = NotifyConfig::default()
            .with_broker(broker.clone())
            .with_bus(BusConfig::default().with_kind("mqtt").with_broker(broker));
        assert!(matches!(config.validate(), Err(NotifyError::Configuration(_))));
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{
            "allow_filter_in_subscriptions": true,
            "publish_deletes": ["v1.1"],
            "status_log_interval": 0,
            "changed_queue": { "workers": 4, "queue_size": 500 },
            "bus": { "kind": "internal" }
        }"#;
        let config: NotifyConfig = serde_json::from_str(json).unwrap();
        let config = config.with_default_keys();

        assert!(config.allow_filter_in_subscriptions);
        assert!(config.publishes_deletes(Version::V1_1));
        assert!(config.status_log_interval.is_zero());
        assert_eq!(config.changed_queue.workers, 4);
        assert_eq!(config.changed_queue.key, "notify.changed_queue");
        assert_eq!(config.broker_client, "embedded");
        assert!(config.validate().is_ok());
    }
}
