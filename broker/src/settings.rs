//! Broker connection settings.

use std::time::Duration;

use serde::Deserialize;
use url::Url;
use worker_pool::QueueSettings;

use crate::client::QoS;
use crate::error::BrokerError;

/// Port used when the URL does not name one
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Connection settings for one broker client plus the tunables of the
/// transport's send and receive queues.
///
/// All durations are given in seconds in configuration files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Broker endpoint, e.g. `tcp://localhost:1883`
    pub url: String,

    /// Client identifier, unique per process instance
    /// Default: `sta-` followed by a random UUID
    pub client_id: String,

    /// Topic used by the cross-node message bus
    /// Default: `sta/bus/changes`
    pub topic: String,

    /// Quality of service for publishes and subscriptions
    /// Default: 1
    pub qos: QoS,

    /// Maximum number of unacknowledged in-flight messages
    /// Default: 50
    pub max_inflight: u16,

    /// Start a clean session instead of resuming the persistent one
    /// Default: false
    pub clean_session: bool,

    /// MQTT keep-alive interval
    /// Default: 30 seconds
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,

    /// How long a connect attempt waits for the broker's acknowledgement
    /// Default: 10 seconds
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Let the client reconnect on its own after a connection loss
    /// Default: true
    pub auto_reconnect: bool,

    /// Interval of the maintenance task that retries `connect`
    /// Default: 60 seconds
    #[serde(with = "duration_secs")]
    pub reconnect_interval: Duration,

    /// Outgoing publishes
    pub send_queue: QueueSettings,

    /// Incoming messages
    pub receive_queue: QueueSettings,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: format!("tcp://localhost:{}", DEFAULT_MQTT_PORT),
            client_id: generate_client_id(),
            topic: "sta/bus/changes".to_string(),
            qos: QoS::AtLeastOnce,
            max_inflight: 50,
            clean_session: false,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(60),
            send_queue: QueueSettings::new(2, 100),
            receive_queue: QueueSettings::new(2, 100),
        }
    }
}

impl BrokerSettings {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_queue(mut self, queue: QueueSettings) -> Self {
        self.send_queue = queue;
        self
    }

    pub fn with_receive_queue(mut self, queue: QueueSettings) -> Self {
        self.receive_queue = queue;
        self
    }

    /// Qualify the queue keys so "queue full" log lines name the right tunables
    pub fn with_config_prefix(mut self, prefix: &str) -> Self {
        self.send_queue.key = format!("{}.send_queue", prefix);
        self.receive_queue.key = format!("{}.receive_queue", prefix);
        self
    }

    /// Host and port of the broker endpoint
    pub fn endpoint(&self) -> Result<(String, u16), BrokerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| BrokerError::Configuration(format!("invalid broker url '{}': {}", self.url, e)))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            other => {
                return Err(BrokerError::Configuration(format!(
                    "unsupported broker url scheme '{}', expected tcp or mqtt",
                    other
                )))
            }
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| BrokerError::Configuration(format!("broker url '{}' has no host", self.url)))?;

        Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), BrokerError> {
        self.endpoint()?;

        if self.client_id.is_empty() {
            return Err(BrokerError::Configuration(
                "client_id must not be empty".to_string(),
            ));
        }

        if self.topic.is_empty() || self.topic.contains(['+', '#']) {
            return Err(BrokerError::Configuration(format!(
                "topic '{}' must be a non-empty topic without wildcards",
                self.topic
            )));
        }

        if self.max_inflight == 0 {
            return Err(BrokerError::Configuration(
                "max_inflight must be greater than 0".to_string(),
            ));
        }

        if self.keep_alive < Duration::from_secs(5) {
            return Err(BrokerError::Configuration(
                "keep_alive must be at least 5 seconds".to_string(),
            ));
        }

        if self.reconnect_interval.is_zero() {
            return Err(BrokerError::Configuration(
                "reconnect_interval must be greater than 0".to_string(),
            ));
        }

        self.send_queue.validate("broker-send")?;
        self.receive_queue.validate("broker-receive")?;

        Ok(())
    }
}

/// A fresh client identifier, `sta-` plus a random UUID
pub fn generate_client_id() -> String {
    format!("sta-{}", uuid::Uuid::new_v4().simple())
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
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
    fn test_default_settings() {
        let settings = BrokerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.reconnect_interval, Duration::from_secs(60));
        assert!(!settings.clean_session);
        assert!(settings.auto_reconnect);
        assert!(settings.client_id.starts_with("sta-"));
        assert_eq!(
            settings.endpoint().unwrap(),
            ("localhost".to_string(), DEFAULT_MQTT_PORT)
        );
    }

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(generate_client_id(), generate_client_id());
    }

    #[test]
    fn test_endpoint_parsing() {
        let settings = BrokerSettings::default().with_url("mqtt://broker.example.com:8883");
        assert_eq!(
            settings.endpoint().unwrap(),
            ("broker.example.com".to_string(), 8883)
        );

        let settings = BrokerSettings::default().with_url("http://broker.example.com");
        assert!(matches!(settings.endpoint(), Err(BrokerError::Configuration(_))));

        let settings = BrokerSettings::default().with_url("not a url");
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation() {
        assert!(BrokerSettings::default().with_client_id("").validate().is_err());
        assert!(BrokerSettings::default().with_topic("sta/#").validate().is_err());
        assert!(BrokerSettings::default()
            .with_reconnect_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(matches!(
            BrokerSettings::default()
                .with_send_queue(QueueSettings::new(0, 10))
                .validate(),
            Err(BrokerError::Pool(_))
        ));
    }

    #[test]
    fn test_config_prefix_names_queues() {
        let settings = BrokerSettings::default().with_config_prefix("bus.broker");
        assert_eq!(settings.send_queue.queue_size_key(), "bus.broker.send_queue.queue_size");
        assert_eq!(settings.receive_queue.workers_key(), "bus.broker.receive_queue.workers");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let settings: BrokerSettings = serde_json::from_str(
            r#"{"url": "tcp://10.0.0.2:1884", "qos": 2, "reconnect_interval": 5, "send_queue": {"workers": 4}}"#,
        )
        .unwrap();
        assert_eq!(settings.qos, QoS::ExactlyOnce);
        assert_eq!(settings.reconnect_interval, Duration::from_secs(5));
        assert_eq!(settings.send_queue.workers, 4);
        assert_eq!(settings.send_queue.queue_size, 100);
        assert_eq!(settings.max_inflight, 50);
    }
}
