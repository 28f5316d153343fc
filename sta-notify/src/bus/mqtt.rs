use std::sync::Arc;

use broker::{BrokerClient, BrokerListener, BrokerSettings, BrokerTransport};
use parking_lot::RwLock;
use sta_model::ChangeEvent;
use worker_pool::PoolStatus;

use super::{BusListener, Listeners, MessageBus};
use crate::error::Result;

/// Decodes change events arriving on the bus topic
struct BusReceiver {
    topic: String,
    listeners: Listeners,
}

impl BrokerListener for BusReceiver {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        if topic != self.topic {
            tracing::debug!("Ignoring bus message on unexpected topic '{}'", topic);
            return;
        }

        match serde_json::from_slice::<ChangeEvent>(payload) {
            Ok(event) => self.listeners.deliver(&event),
            Err(e) => tracing::debug!(
                "Dropping undecodable bus message on '{}': {}; payload: {}",
                topic,
                e,
                String::from_utf8_lossy(payload)
            ),
        }
    }
}

/// Bus that publishes change events as JSON on one broker topic and delivers
/// every event received on that topic, including its own, to its listeners.
///
/// The transport's send queue holds outgoing events and its receive queue
/// incoming ones, each drained by its own workers.
pub struct MqttMessageBus {
    settings: BrokerSettings,
    client: Arc<dyn BrokerClient>,
    listeners: Listeners,
    transport: RwLock<Option<BrokerTransport>>,
}

impl MqttMessageBus {
    pub fn new(settings: BrokerSettings, client: Arc<dyn BrokerClient>) -> Self {
        Self {
            settings,
            client,
            listeners: Listeners::default(),
            transport: RwLock::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    fn subscribe(&self, transport: &BrokerTransport) -> Result<()> {
        transport.subscribe(&self.settings.topic, self.settings.qos)?;
        Ok(())
    }
}

impl MessageBus for MqttMessageBus {
    fn start(&self) -> Result<()> {
        let mut transport = self.transport.write();
        if transport.is_some() {
            return Ok(());
        }

        let receiver = Arc::new(BusReceiver {
            topic: self.settings.topic.clone(),
            listeners: self.listeners.clone(),
        });
        let started = BrokerTransport::start(
            "bus",
            Arc::clone(&self.client),
            self.settings.clone(),
            receiver,
        )?;

        if !self.listeners.is_empty() {
            self.subscribe(&started)?;
        }
        *transport = Some(started);

        tracing::info!("MQTT message bus started on topic '{}'", self.settings.topic);
        Ok(())
    }

    fn send_change(&self, event: ChangeEvent) -> bool {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    "Failed to encode {} {} for the bus: {}",
                    event.entity_type(),
                    event.entity.id,
                    e
                );
                return false;
            }
        };

        match self.transport.read().as_ref() {
            Some(transport) => transport.publish(&self.settings.topic, payload, self.settings.qos),
            None => {
                tracing::warn!(
                    "Message bus not started, dropping {} {}",
                    event.entity_type(),
                    event.entity.id
                );
                false
            }
        }
    }

    fn add_listener(&self, listener: Arc<dyn BusListener>) {
        let first = self.listeners.add(listener);
        if !first {
            return;
        }
        if let Some(transport) = self.transport.read().as_ref() {
            if let Err(e) = self.subscribe(transport) {
                tracing::error!(
                    "Failed to subscribe to bus topic '{}': {}",
                    self.settings.topic,
                    e
                );
            }
        }
    }

    fn stop(&self) {
        if let Some(transport) = self.transport.write().take() {
            transport.shutdown();
            tracing::info!("MQTT message bus stopped");
        }
    }

    fn pool_statuses(&self) -> Vec<PoolStatus> {
        self.transport
            .read()
            .as_ref()
            .map(BrokerTransport::pool_statuses)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::EmbeddedBroker;
    use parking_lot::Mutex;
    use sta_model::{Entity, EntityType};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recording(Mutex<Vec<ChangeEvent>>);

    impl BusListener for Recording {
        fn on_change(&self, event: &ChangeEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_events_round_trip_through_broker() {
        let broker = EmbeddedBroker::with_loopback();
        let bus = MqttMessageBus::new(
            BrokerSettings::default().with_topic("sta/test/bus"),
            Arc::new(broker.clone()),
        );
        let listener = Arc::new(Recording::default());
        bus.start().unwrap();
        bus.add_listener(listener.clone());
        assert_eq!(broker.server_filters(), vec!["sta/test/bus".to_string()]);

        let entity = Entity::new(EntityType::Observation, 7).with_property("result", 21.5);
        assert!(bus.send_change(ChangeEvent::updated(entity.clone(), ["result"])));

        assert!(wait_for(|| listener.0.lock().len() == 1));
        let received = listener.0.lock()[0].clone();
        assert_eq!(received.entity, entity);
        assert!(received.has_changed("result"));

        bus.stop();
    }

    #[test]
    fn test_undecodable_messages_are_dropped() {
        let broker = EmbeddedBroker::new();
        let bus = MqttMessageBus::new(
            BrokerSettings::default().with_topic("sta/test/bus"),
            Arc::new(broker.clone()),
        );
        let listener = Arc::new(Recording::default());
        bus.add_listener(listener.clone());
        bus.start().unwrap();

        let peer = broker.connect_client("peer").unwrap();
        peer.publish("sta/test/bus", "not json").unwrap();
        let event = ChangeEvent::created(Entity::new(EntityType::Thing, 1));
        peer.publish("sta/test/bus", serde_json::to_vec(&event).unwrap())
            .unwrap();

        assert!(wait_for(|| listener.0.lock().len() == 1));
        assert_eq!(listener.0.lock()[0], event);
        bus.stop();
    }
}
