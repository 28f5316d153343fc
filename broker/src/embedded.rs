//! An in-process broker.
//!
//! [`EmbeddedBroker`] plays the role of a broker running inside the server
//! process. The server side talks to it through the [`BrokerClient`] trait
//! like it would talk to any broker; remote clients attach through
//! [`ClientSession`]. Unlike an external broker it can tell the server which
//! topics remote clients subscribe to, and lets the server refuse a
//! subscription before it is registered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::client::{BrokerClient, BrokerListener, BrokerMessage, QoS};
use crate::error::{BrokerError, Result};
use crate::topic::{is_valid_filter, topic_matches};

/// Messages buffered per client before new ones are dropped
const SESSION_QUEUE_CAPACITY: usize = 1024;

struct Session {
    filters: Vec<String>,
    sender: Sender<BrokerMessage>,
}

struct BrokerCore {
    listener: RwLock<Option<Arc<dyn BrokerListener>>>,
    connected: AtomicBool,
    /// Deliver the server's own publishes back to it when it subscribed to them
    loopback: bool,
    server_filters: DashMap<String, QoS>,
    sessions: DashMap<String, Session>,
}

impl BrokerCore {
    fn listener(&self) -> Option<Arc<dyn BrokerListener>> {
        self.listener.read().clone()
    }

    fn server_subscribed(&self, topic: &str) -> bool {
        self.server_filters
            .iter()
            .any(|entry| topic_matches(entry.key(), topic))
    }

    /// Offer every session filter to a newly attached listener. Filters it
    /// refuses are dropped from their session.
    fn replay_sessions(&self, listener: &dyn BrokerListener) {
        let snapshot: Vec<(String, Vec<String>)> = self
            .sessions
            .iter()
            .map(|session| (session.key().clone(), session.filters.clone()))
            .collect();

        for (client_id, filters) in snapshot {
            let refused: Vec<String> = filters
                .into_iter()
                .filter(|filter| match listener.on_client_subscribe(&client_id, filter) {
                    Ok(()) => false,
                    Err(reason) => {
                        tracing::warn!(
                            "Dropping subscription of '{}' to '{}': {}",
                            client_id,
                            filter,
                            reason
                        );
                        true
                    }
                })
                .collect();

            if !refused.is_empty() {
                if let Some(mut session) = self.sessions.get_mut(&client_id) {
                    session.filters.retain(|f| !refused.contains(f));
                }
            }
        }
    }

    fn deliver_to_sessions(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for session in self.sessions.iter() {
            if !session.filters.iter().any(|f| topic_matches(f, topic)) {
                continue;
            }
            match session.sender.try_send(BrokerMessage::new(topic, payload)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Client '{}' is not keeping up, dropping message on '{}'",
                        session.key(),
                        topic
                    );
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        delivered
    }
}

/// In-process broker. Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct EmbeddedBroker {
    core: Arc<BrokerCore>,
}

impl Default for EmbeddedBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedBroker {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A broker that also delivers the server's own publishes to the server
    /// listener, the way an external MQTT broker echoes messages back to a
    /// subscribed publisher
    pub fn with_loopback() -> Self {
        Self::build(true)
    }

    fn build(loopback: bool) -> Self {
        Self {
            core: Arc::new(BrokerCore {
                listener: RwLock::new(None),
                connected: AtomicBool::new(false),
                loopback,
                server_filters: DashMap::new(),
                sessions: DashMap::new(),
            }),
        }
    }

    /// Attach a remote client
    pub fn connect_client(&self, client_id: impl Into<String>) -> Result<ClientSession> {
        let client_id = client_id.into();
        let (sender, receiver) = channel::bounded(SESSION_QUEUE_CAPACITY);

        match self.core.sessions.entry(client_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(BrokerError::DuplicateClient(client_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Session {
                    filters: Vec::new(),
                    sender,
                });
            }
        }

        tracing::debug!("Client '{}' connected to embedded broker", client_id);
        Ok(ClientSession {
            client_id,
            core: Arc::clone(&self.core),
            receiver,
        })
    }

    /// Number of attached remote clients
    pub fn client_count(&self) -> usize {
        self.core.sessions.len()
    }

    /// Filters the server side is subscribed to
    pub fn server_filters(&self) -> Vec<String> {
        self.core
            .server_filters
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Simulate a dropped server connection. The listener is told, and the
    /// broker refuses publishes until `connect` is called again.
    pub fn drop_connection(&self, reason: &str) {
        if self.core.connected.swap(false, Ordering::AcqRel) {
            if let Some(listener) = self.core.listener() {
                listener.on_connection_lost(reason);
            }
        }
    }
}

impl BrokerClient for EmbeddedBroker {
    fn connect(&self, listener: Arc<dyn BrokerListener>) -> Result<()> {
        let previous = self.core.listener.write().replace(Arc::clone(&listener));
        if !self.core.connected.swap(true, Ordering::AcqRel) {
            listener.on_connected();
        }
        // Sessions may have subscribed while no server was attached
        if previous.is_none() {
            self.core.replay_sessions(listener.as_ref());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::Acquire)
    }

    fn publish(&self, topic: &str, payload: &[u8], _qos: QoS) -> Result<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected("embedded broker".to_string()));
        }

        let delivered = self.core.deliver_to_sessions(topic, payload);
        tracing::trace!("Delivered '{}' to {} clients", topic, delivered);

        if self.core.loopback && self.core.server_subscribed(topic) {
            if let Some(listener) = self.core.listener() {
                listener.on_message(topic, payload);
            }
        }
        Ok(())
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        if !is_valid_filter(filter) {
            return Err(BrokerError::SubscriptionFailed {
                filter: filter.to_string(),
                reason: "invalid topic filter".to_string(),
            });
        }
        self.core.server_filters.insert(filter.to_string(), qos);
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.core.server_filters.remove(filter);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.core.connected.store(false, Ordering::Release);
        self.core.listener.write().take();
        Ok(())
    }

    fn reports_client_interest(&self) -> bool {
        true
    }
}

/// A remote client attached to an [`EmbeddedBroker`].
///
/// Dropping the session disconnects the client.
pub struct ClientSession {
    client_id: String,
    core: Arc<BrokerCore>,
    receiver: Receiver<BrokerMessage>,
}

impl ClientSession {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Subscribe to `filter`.
    ///
    /// The server may refuse; the refusal is returned as
    /// [`BrokerError::SubscriptionRejected`] and nothing is registered. With
    /// no server attached the filter is kept and offered to the server when
    /// it connects.
    pub fn subscribe(&self, filter: &str) -> Result<()> {
        if !is_valid_filter(filter) {
            return Err(BrokerError::SubscriptionRejected {
                filter: filter.to_string(),
                reason: "invalid topic filter".to_string(),
            });
        }

        let already_subscribed = self
            .core
            .sessions
            .get(&self.client_id)
            .map_or(false, |s| s.filters.iter().any(|f| f == filter));
        if already_subscribed {
            return Ok(());
        }

        if let Some(listener) = self.core.listener() {
            listener
                .on_client_subscribe(&self.client_id, filter)
                .map_err(|reason| BrokerError::SubscriptionRejected {
                    filter: filter.to_string(),
                    reason,
                })?;
        }

        if let Some(mut session) = self.core.sessions.get_mut(&self.client_id) {
            session.filters.push(filter.to_string());
        }
        Ok(())
    }

    pub fn unsubscribe(&self, filter: &str) -> Result<()> {
        let removed = match self.core.sessions.get_mut(&self.client_id) {
            Some(mut session) => {
                let before = session.filters.len();
                session.filters.retain(|f| f != filter);
                before != session.filters.len()
            }
            None => false,
        };

        if removed {
            if let Some(listener) = self.core.listener() {
                listener.on_client_unsubscribe(&self.client_id, filter);
            }
        }
        Ok(())
    }

    /// Publish a message as this client
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason: "topic must not be empty or contain wildcards".to_string(),
            });
        }

        let payload = payload.as_ref();
        self.core.deliver_to_sessions(topic, payload);
        if self.core.server_subscribed(topic) {
            if let Some(listener) = self.core.listener() {
                listener.on_message(topic, payload);
            }
        }
        Ok(())
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<BrokerMessage> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<BrokerMessage> {
        self.receiver.try_recv().ok()
    }

    /// Disconnect explicitly; same as dropping the session
    pub fn disconnect(self) {}
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.core.sessions.remove(&self.client_id);
        tracing::debug!("Client '{}' disconnected from embedded broker", self.client_id);
        if let Some(listener) = self.core.listener() {
            listener.on_client_disconnect(&self.client_id);
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        messages: Mutex<Vec<String>>,
        subscribes: Mutex<Vec<(String, String)>>,
        disconnects: Mutex<Vec<String>>,
    }

    impl BrokerListener for RecordingListener {
        fn on_message(&self, topic: &str, _payload: &[u8]) {
            self.messages.lock().push(topic.to_string());
        }

        fn on_client_subscribe(&self, client_id: &str, topic: &str) -> std::result::Result<(), String> {
            if topic.contains("$top") {
                return Err("$top is not allowed".to_string());
            }
            self.subscribes
                .lock()
                .push((client_id.to_string(), topic.to_string()));
            Ok(())
        }

        fn on_client_disconnect(&self, client_id: &str) {
            self.disconnects.lock().push(client_id.to_string());
        }
    }

    fn connected_broker() -> (EmbeddedBroker, Arc<RecordingListener>) {
        let broker = EmbeddedBroker::new();
        let listener = Arc::new(RecordingListener::default());
        broker.connect(listener.clone()).unwrap();
        (broker, listener)
    }

    #[test]
    fn test_server_publish_reaches_matching_clients() {
        let (broker, _listener) = connected_broker();
        let a = broker.connect_client("a").unwrap();
        let b = broker.connect_client("b").unwrap();
        a.subscribe("v1.0/Things(5)/Datastreams").unwrap();
        b.subscribe("v1.0/Things(6)/Datastreams").unwrap();

        broker
            .publish("v1.0/Things(5)/Datastreams", b"{}", QoS::AtLeastOnce)
            .unwrap();

        let message = a.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(message.topic, "v1.0/Things(5)/Datastreams");
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn test_rejected_subscription_is_not_registered() {
        let (broker, listener) = connected_broker();
        let client = broker.connect_client("c").unwrap();

        let error = client.subscribe("v1.0/Things?$top=1").unwrap_err();
        assert!(matches!(error, BrokerError::SubscriptionRejected { .. }));

        broker
            .publish("v1.0/Things?$top=1", b"{}", QoS::AtMostOnce)
            .unwrap();
        assert!(client.try_recv().is_none());
        assert!(listener.subscribes.lock().is_empty());
    }

    #[test]
    fn test_duplicate_subscribe_reported_once() {
        let (broker, listener) = connected_broker();
        let client = broker.connect_client("c").unwrap();
        client.subscribe("v1.0/Things").unwrap();
        client.subscribe("v1.0/Things").unwrap();
        assert_eq!(listener.subscribes.lock().len(), 1);
    }

    #[test]
    fn test_client_publish_reaches_server_only_when_subscribed() {
        let (broker, listener) = connected_broker();
        let client = broker.connect_client("c").unwrap();

        client.publish("v1.0/Observations", "{}").unwrap();
        assert!(listener.messages.lock().is_empty());

        broker.subscribe("v1.0/#", QoS::AtLeastOnce).unwrap();
        client.publish("v1.0/Observations", "{}").unwrap();
        assert_eq!(*listener.messages.lock(), vec!["v1.0/Observations".to_string()]);

        assert!(client.publish("v1.0/#", "{}").is_err());
    }

    #[test]
    fn test_loopback_only_when_enabled() {
        let listener = Arc::new(RecordingListener::default());
        let plain = EmbeddedBroker::new();
        plain.connect(listener.clone()).unwrap();
        plain.subscribe("sta/bus", QoS::AtLeastOnce).unwrap();
        plain.publish("sta/bus", b"x", QoS::AtLeastOnce).unwrap();
        assert!(listener.messages.lock().is_empty());

        let echoing = EmbeddedBroker::with_loopback();
        echoing.connect(listener.clone()).unwrap();
        echoing.subscribe("sta/bus", QoS::AtLeastOnce).unwrap();
        echoing.publish("sta/bus", b"x", QoS::AtLeastOnce).unwrap();
        assert_eq!(listener.messages.lock().len(), 1);
    }

    #[test]
    fn test_drop_disconnects_client() {
        let (broker, listener) = connected_broker();
        let client = broker.connect_client("gone").unwrap();
        assert!(matches!(
            broker.connect_client("gone"),
            Err(BrokerError::DuplicateClient(_))
        ));
        assert_eq!(broker.client_count(), 1);

        drop(client);
        assert_eq!(broker.client_count(), 0);
        assert_eq!(*listener.disconnects.lock(), vec!["gone".to_string()]);
    }

    #[test]
    fn test_early_subscriptions_are_offered_on_connect() {
        let broker = EmbeddedBroker::new();
        let client = broker.connect_client("early").unwrap();
        client.subscribe("v1.0/Things").unwrap();
        client.subscribe("v1.0/Things?$top=1").unwrap();

        let listener = Arc::new(RecordingListener::default());
        broker.connect(listener.clone()).unwrap();
        assert_eq!(
            *listener.subscribes.lock(),
            vec![("early".to_string(), "v1.0/Things".to_string())]
        );

        // The refused filter is gone, the accepted one still delivers
        broker
            .publish("v1.0/Things?$top=1", b"{}", QoS::AtMostOnce)
            .unwrap();
        assert!(client.try_recv().is_none());
        broker.publish("v1.0/Things", b"{}", QoS::AtMostOnce).unwrap();
        assert!(client.recv_timeout(Duration::from_secs(1)).is_some());

        // A plain reconnect does not offer them again
        broker.drop_connection("blip");
        broker.connect(listener.clone()).unwrap();
        assert_eq!(listener.subscribes.lock().len(), 1);
    }

    #[test]
    fn test_publish_requires_connection() {
        let broker = EmbeddedBroker::new();
        assert!(matches!(
            broker.publish("t", b"", QoS::AtMostOnce),
            Err(BrokerError::NotConnected(_))
        ));
    }
}
