//! The seams between a transport and a concrete broker client.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// MQTT quality of service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> std::result::Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A message as delivered by a broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Callbacks from a broker client.
///
/// `on_message` and the connection callbacks come from the client's I/O
/// thread and must not block. The `on_client_*` callbacks are only raised by
/// clients that can see other clients' subscriptions, such as
/// [`EmbeddedBroker`](crate::EmbeddedBroker).
pub trait BrokerListener: Send + Sync {
    /// A message arrived on a subscribed topic
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The connection is up, either for the first time or after a reconnect
    fn on_connected(&self) {}

    /// The connection dropped
    fn on_connection_lost(&self, _reason: &str) {}

    /// A remote client asks to subscribe to `topic`.
    ///
    /// Returning `Err(reason)` rejects the subscription; the client receives
    /// a negative acknowledgement and nothing is registered.
    fn on_client_subscribe(&self, _client_id: &str, _topic: &str) -> std::result::Result<(), String> {
        Ok(())
    }

    /// A remote client dropped its subscription to `topic`
    fn on_client_unsubscribe(&self, _client_id: &str, _topic: &str) {}

    /// A remote client went away; all its subscriptions are gone
    fn on_client_disconnect(&self, _client_id: &str) {}
}

/// One connection to a publish/subscribe broker.
pub trait BrokerClient: Send + Sync {
    /// Establish the connection. Must be safe to call when already connected.
    fn connect(&self, listener: Arc<dyn BrokerListener>) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<()>;

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<()>;

    fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// Close the connection and forget the listener
    fn disconnect(&self) -> Result<()>;

    /// Whether this client raises the `on_client_*` callbacks
    fn reports_client_interest(&self) -> bool {
        false
    }
}
