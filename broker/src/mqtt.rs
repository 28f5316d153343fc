//! Connection to an external MQTT broker, backed by `rumqttc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel;
use parking_lot::Mutex;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet};

use crate::client::{BrokerClient, BrokerListener, QoS};
use crate::error::{BrokerError, Result};
use crate::settings::BrokerSettings;

/// Capacity of the request channel between the client handle and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 256;

/// Pause between reconnect attempts of the event loop
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// A live client handle plus the thread driving its event loop
struct MqttSession {
    client: Client,
    stop: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

/// MQTT 3.1.1 client for an external broker.
///
/// The event loop runs on its own thread. With `auto_reconnect` set it keeps
/// reconnecting after a loss; otherwise the thread ends and the next
/// [`connect`](BrokerClient::connect) starts a fresh session.
pub struct MqttClient {
    settings: BrokerSettings,
    connected: Arc<AtomicBool>,
    session: Mutex<Option<MqttSession>>,
}

impl MqttClient {
    pub fn new(settings: BrokerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            connected: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        })
    }

    fn options(&self) -> Result<MqttOptions> {
        let (host, port) = self.settings.endpoint()?;
        let mut options = MqttOptions::new(self.settings.client_id.clone(), host, port);
        options
            .set_keep_alive(self.settings.keep_alive)
            .set_clean_session(self.settings.clean_session)
            .set_inflight(self.settings.max_inflight);
        Ok(options)
    }

    fn with_client<T>(
        &self,
        action: impl FnOnce(&Client) -> std::result::Result<T, rumqttc::ClientError>,
    ) -> std::result::Result<T, String> {
        let session = self.session.lock();
        let session = session
            .as_ref()
            .ok_or_else(|| "no session, call connect first".to_string())?;
        action(&session.client).map_err(|e| e.to_string())
    }
}

impl BrokerClient for MqttClient {
    fn connect(&self, listener: Arc<dyn BrokerListener>) -> Result<()> {
        let mut session = self.session.lock();

        if let Some(existing) = session.as_ref() {
            if !existing.event_loop.is_finished() {
                return if self.connected.load(Ordering::Acquire) {
                    Ok(())
                } else {
                    Err(BrokerError::NotConnected(format!(
                        "reconnect to {} in progress",
                        self.settings.url
                    )))
                };
            }
        }

        let (client, connection) = Client::new(self.options()?, REQUEST_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let event_loop = {
            let stop = Arc::clone(&stop);
            let connected = Arc::clone(&self.connected);
            let auto_reconnect = self.settings.auto_reconnect;
            thread::Builder::new()
                .name(format!("mqtt-{}", self.settings.client_id))
                .spawn(move || {
                    run_event_loop(connection, listener, connected, stop, auto_reconnect, ready_tx)
                })
                .map_err(|e| BrokerError::ConnectFailed {
                    url: self.settings.url.clone(),
                    reason: format!("failed to spawn event loop: {}", e),
                })?
        };

        *session = Some(MqttSession {
            client,
            stop,
            event_loop,
        });
        drop(session);

        match ready_rx.recv_timeout(self.settings.connect_timeout) {
            Ok(Ok(())) => {
                tracing::info!(
                    "Connected to MQTT broker {} as '{}'",
                    self.settings.url,
                    self.settings.client_id
                );
                Ok(())
            }
            Ok(Err(reason)) => Err(BrokerError::ConnectFailed {
                url: self.settings.url.clone(),
                reason,
            }),
            Err(_) => Err(BrokerError::ConnectFailed {
                url: self.settings.url.clone(),
                reason: format!("no answer within {:?}", self.settings.connect_timeout),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        self.with_client(|client| client.try_publish(topic, qos.into(), false, payload.to_vec()))
            .map_err(|reason| BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason,
            })
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        self.with_client(|client| client.try_subscribe(filter, qos.into()))
            .map_err(|reason| BrokerError::SubscriptionFailed {
                filter: filter.to_string(),
                reason,
            })
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.with_client(|client| client.try_unsubscribe(filter))
            .map_err(|reason| BrokerError::SubscriptionFailed {
                filter: filter.to_string(),
                reason,
            })
    }

    fn disconnect(&self) -> Result<()> {
        let Some(session) = self.session.lock().take() else {
            return Ok(());
        };

        session.stop.store(true, Ordering::Release);
        if let Err(e) = session.client.try_disconnect() {
            tracing::debug!("MQTT disconnect request failed: {}", e);
        }
        self.connected.store(false, Ordering::Release);
        // Not joined: the loop exits on its next notification
        drop(session.event_loop);
        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Drive the connection until stopped, reporting state changes to `listener`
fn run_event_loop(
    mut connection: Connection,
    listener: Arc<dyn BrokerListener>,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    auto_reconnect: bool,
    ready: channel::Sender<std::result::Result<(), String>>,
) {
    for notification in connection.iter() {
        if stop.load(Ordering::Acquire) {
            break;
        }

        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::Release);
                let _ = ready.try_send(Ok(()));
                listener.on_connected();
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                listener.on_message(&publish.topic, &publish.payload[..]);
            }
            Ok(_) => {}
            Err(e) => {
                let reason = e.to_string();
                if connected.swap(false, Ordering::AcqRel) {
                    listener.on_connection_lost(&reason);
                }
                let _ = ready.try_send(Err(reason));

                if !auto_reconnect || stop.load(Ordering::Acquire) {
                    break;
                }
                thread::sleep(RECONNECT_BACKOFF);
            }
        }
    }

    connected.store(false, Ordering::Release);
    tracing::debug!("MQTT event loop stopped");
}
