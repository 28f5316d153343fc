//! Owns one broker connection and decouples it from its users.
//!
//! This module contains the [`BrokerTransport`] which handles:
//! - Connecting through a [`BrokerClient`], retried by a maintenance task
//! - Queueing publishes on a send-side worker pool so slow broker I/O never
//!   blocks the caller
//! - Queueing incoming messages on a receive-side worker pool so the client's
//!   I/O thread never runs request handling
//! - Remembering the active topic filters and restoring them after a reconnect
//!
//! # Connection loss
//!
//! A loss is logged once and marks the transport as not listening. Recovery
//! is left to the client's own reconnect logic and the maintenance task.
//! Publishes taken from the queue while disconnected wait up to the connect
//! timeout for the connection to come back; if it does not, the publish is
//! logged as failed by the send pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::interval_at;
use worker_pool::{PoolStatus, WorkerPool};

use crate::client::{BrokerClient, BrokerListener, BrokerMessage, QoS};
use crate::error::{BrokerError, Result};
use crate::settings::BrokerSettings;

/// How long shutdown waits for the maintenance task
const MAINTENANCE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while a send worker waits for a reconnect
const RECONNECT_POLL: Duration = Duration::from_millis(20);

/// Work item of the send pool
#[derive(Debug)]
enum Outgoing {
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
    },
    /// Re-issue every active filter after a reconnect
    Restore,
}

/// State shared by the transport, its callbacks and its workers
struct TransportState {
    name: String,
    listening: AtomicBool,
    filters: DashMap<String, QoS>,
    reconnect_interval: Duration,
}

/// Listener handed to the broker client. Forwards to the pools and to the
/// upstream listener.
struct ClientCallbacks {
    state: Arc<TransportState>,
    send_pool: Arc<WorkerPool<Outgoing>>,
    receive_pool: Arc<WorkerPool<BrokerMessage>>,
    upstream: Arc<dyn BrokerListener>,
}

impl BrokerListener for ClientCallbacks {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        // A full queue is logged by the pool
        self.receive_pool.submit(BrokerMessage::new(topic, payload));
    }

    fn on_connected(&self) {
        self.state.listening.store(true, Ordering::Release);
        tracing::info!("Transport '{}' is connected", self.state.name);
        if !self.state.filters.is_empty() {
            self.send_pool.submit(Outgoing::Restore);
        }
        self.upstream.on_connected();
    }

    fn on_connection_lost(&self, reason: &str) {
        if self.state.listening.swap(false, Ordering::AcqRel) {
            tracing::warn!(
                "Transport '{}' lost its broker connection: {}; retrying every {:?}",
                self.state.name,
                reason,
                self.state.reconnect_interval
            );
            self.upstream.on_connection_lost(reason);
        }
    }

    fn on_client_subscribe(&self, client_id: &str, topic: &str) -> std::result::Result<(), String> {
        self.upstream.on_client_subscribe(client_id, topic)
    }

    fn on_client_unsubscribe(&self, client_id: &str, topic: &str) {
        self.upstream.on_client_unsubscribe(client_id, topic)
    }

    fn on_client_disconnect(&self, client_id: &str) {
        self.upstream.on_client_disconnect(client_id)
    }
}

struct TransportInner {
    state: Arc<TransportState>,
    client: Arc<dyn BrokerClient>,
    callbacks: Arc<ClientCallbacks>,
    send_pool: Arc<WorkerPool<Outgoing>>,
    receive_pool: Arc<WorkerPool<BrokerMessage>>,
    connect_lock: Mutex<()>,
}

impl TransportInner {
    fn connect(&self) {
        let _guard = self.connect_lock.lock();
        if self.client.is_connected() {
            return;
        }

        let listener: Arc<dyn BrokerListener> = self.callbacks.clone();
        match self.client.connect(listener) {
            Ok(()) => {
                self.state.listening.store(true, Ordering::Release);
                tracing::debug!("Transport '{}' connect succeeded", self.state.name);
            }
            Err(e) => {
                tracing::warn!(
                    "Transport '{}' could not connect: {}; next attempt in {:?}",
                    self.state.name,
                    e,
                    self.state.reconnect_interval
                );
            }
        }
    }
}

/// Background task that calls `connect` on every tick
struct MaintenanceTask {
    shutdown_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl MaintenanceTask {
    fn spawn(inner: Arc<TransportInner>) -> Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let period = inner.state.reconnect_interval;
        let name = format!("{}-maintenance", inner.state.name);

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!("Failed to create runtime for broker maintenance: {}", e);
                        return;
                    }
                };

                rt.block_on(async move {
                    // start() already made the first attempt
                    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => inner.connect(),
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                });
            })
            .map_err(|e| BrokerError::Configuration(format!("failed to spawn maintenance task: {}", e)))?;

        Ok(Self {
            shutdown_tx,
            thread,
        })
    }

    fn shutdown(self, name: &str) {
        let _ = self.shutdown_tx.try_send(());

        let deadline = Instant::now() + MAINTENANCE_SHUTDOWN_TIMEOUT;
        while !self.thread.is_finished() && Instant::now() < deadline {
            thread::sleep(RECONNECT_POLL);
        }

        if self.thread.is_finished() {
            let _ = self.thread.join();
        } else {
            tracing::warn!(
                "Maintenance task of transport '{}' did not stop within {:?}",
                name,
                MAINTENANCE_SHUTDOWN_TIMEOUT
            );
        }
    }
}

/// One broker connection with queued publishing and receiving.
pub struct BrokerTransport {
    inner: Arc<TransportInner>,
    maintenance: Mutex<Option<MaintenanceTask>>,
    stopped: AtomicBool,
}

impl BrokerTransport {
    /// Start the pools, make a first connection attempt and start the
    /// maintenance task.
    ///
    /// # Arguments
    /// * `name` - Used in pool names and log lines, e.g. `notify` or `bus`
    /// * `client` - The broker client to drive
    /// * `settings` - Queue sizes, reconnect interval and connect timeout
    /// * `upstream` - Receives messages (on receive-pool workers) and
    ///   connection and client-interest callbacks
    ///
    /// # Returns
    /// The running transport, even when the first connection attempt failed.
    pub fn start(
        name: impl Into<String>,
        client: Arc<dyn BrokerClient>,
        settings: BrokerSettings,
        upstream: Arc<dyn BrokerListener>,
    ) -> Result<Self> {
        let name = name.into();
        settings.validate()?;

        let state = Arc::new(TransportState {
            name: name.clone(),
            listening: AtomicBool::new(false),
            filters: DashMap::new(),
            reconnect_interval: settings.reconnect_interval,
        });

        let send_pool = {
            let client = Arc::clone(&client);
            let state = Arc::clone(&state);
            let reconnect_wait = settings.connect_timeout;
            WorkerPool::start(
                format!("{}-send", name),
                settings.send_queue.clone(),
                move |item: Outgoing| match item {
                    Outgoing::Publish {
                        topic,
                        payload,
                        qos,
                    } => {
                        wait_for_connection(client.as_ref(), reconnect_wait);
                        client.publish(&topic, &payload, qos)?;
                        Ok(())
                    }
                    Outgoing::Restore => {
                        restore_filters(client.as_ref(), &state);
                        Ok(())
                    }
                },
            )?
        };

        let receive_pool = {
            let upstream = Arc::clone(&upstream);
            WorkerPool::start(
                format!("{}-receive", name),
                settings.receive_queue.clone(),
                move |message: BrokerMessage| {
                    upstream.on_message(&message.topic, &message.payload);
                    Ok(())
                },
            )?
        };

        let send_pool = Arc::new(send_pool);
        let receive_pool = Arc::new(receive_pool);
        let callbacks = Arc::new(ClientCallbacks {
            state: Arc::clone(&state),
            send_pool: Arc::clone(&send_pool),
            receive_pool: Arc::clone(&receive_pool),
            upstream,
        });

        let inner = Arc::new(TransportInner {
            state,
            client,
            callbacks,
            send_pool,
            receive_pool,
            connect_lock: Mutex::new(()),
        });

        inner.connect();
        let maintenance = MaintenanceTask::spawn(Arc::clone(&inner))?;

        tracing::info!("Transport '{}' started", name);
        Ok(Self {
            inner,
            maintenance: Mutex::new(Some(maintenance)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.state.name
    }

    /// Connect if not connected. Failures are logged; the maintenance task
    /// retries later.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// False between a connection loss and the next successful connect
    pub fn is_listening(&self) -> bool {
        self.inner.state.listening.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.client.is_connected()
    }

    /// Whether the underlying client reports remote clients' subscriptions
    pub fn reports_client_interest(&self) -> bool {
        self.inner.client.reports_client_interest()
    }

    /// Queue a publish. Returns `false` if the send queue is full.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS) -> bool {
        self.inner.send_pool.submit(Outgoing::Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos,
        })
    }

    /// Subscribe to a topic filter on the broker.
    ///
    /// The filter is remembered and re-issued after every reconnect, so a
    /// subscribe while disconnected takes effect once the connection is back.
    pub fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        self.inner.state.filters.insert(filter.to_string(), qos);
        if self.inner.client.is_connected() {
            self.inner.client.subscribe(filter, qos)?;
        }
        tracing::debug!("Transport '{}' subscribed to '{}'", self.name(), filter);
        Ok(())
    }

    pub fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.inner.state.filters.remove(filter);
        if self.inner.client.is_connected() {
            self.inner.client.unsubscribe(filter)?;
        }
        tracing::debug!("Transport '{}' unsubscribed from '{}'", self.name(), filter);
        Ok(())
    }

    /// Topic filters that are restored after a reconnect
    pub fn active_filters(&self) -> Vec<String> {
        self.inner
            .state
            .filters
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        vec![
            self.inner.send_pool.status(),
            self.inner.receive_pool.status(),
        ]
    }

    /// Stop the maintenance task, drain the send queue, disconnect and drain
    /// the receive queue. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(maintenance) = self.maintenance.lock().take() {
            maintenance.shutdown(self.name());
        }

        self.inner.send_pool.shutdown();
        if let Err(e) = self.inner.client.disconnect() {
            tracing::warn!("Transport '{}' failed to disconnect: {}", self.name(), e);
        }
        self.inner.state.listening.store(false, Ordering::Release);
        self.inner.receive_pool.shutdown();

        tracing::info!("Transport '{}' stopped", self.name());
    }
}

impl Drop for BrokerTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Block until `client` is connected or `timeout` passes
fn wait_for_connection(client: &dyn BrokerClient, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !client.is_connected() && Instant::now() < deadline {
        thread::sleep(RECONNECT_POLL);
    }
}

fn restore_filters(client: &dyn BrokerClient, state: &TransportState) {
    let filters: Vec<(String, QoS)> = state
        .filters
        .iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect();

    for (filter, qos) in filters {
        if let Err(e) = client.subscribe(&filter, qos) {
            tracing::error!(
                "Transport '{}' failed to restore subscription '{}': {}",
                state.name,
                filter,
                e
            );
        }
    }
    tracing::debug!("Transport '{}' restored its subscriptions", state.name);
}
