//! Orchestrates the notification pipeline.
//!
//! This module contains the [`NotificationDispatcher`] which handles:
//! - Registering and releasing client subscriptions as the broker reports them
//! - Receiving change events from the message bus and queueing those that
//!   have subscribers
//! - Matching queued events against the [`SubscriptionIndex`] and publishing
//!   the rendered payload on each matching topic
//! - Executing create requests that clients publish on collection topics
//!
//! # Queues
//!
//! Two pools of its own, each tuned separately:
//!
//! - `notify-changed`: change events waiting to be matched and published
//! - `notify-create`: inbound create requests waiting to be executed
//!
//! Publishing goes through the transport's send queue and inbound messages
//! arrive through its receive queue, so no broker or storage I/O ever runs on
//! the thread that produced the work.
//!
//! # Deletes
//!
//! Delete events are only published to subscribers of protocol versions
//! listed in `publish_deletes`. With the default configuration they are
//! dropped before queueing.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use broker::{BrokerListener, BrokerTransport, EmbeddedBroker, QoS};
use dashmap::DashMap;
use parking_lot::Mutex;
use sta_model::{ChangeEvent, EventType, ServiceRequest, Version};
use worker_pool::{PoolStatus, WorkerPool};

use crate::bus::{BusListener, MessageBus};
use crate::config::NotifyConfig;
use crate::error::{NotifyError, Result, SubscriptionRejection};
use crate::index::SubscriptionIndex;
use crate::registry::BrokerBinding;
use crate::services::Services;
use crate::status::{StatusReporter, StatusSource};
use crate::subscription::{ChangeMatcher, Subscription, SubscriptionFactory};

/// A create request decoded from a client's publish
#[derive(Debug)]
struct InboundCreate {
    topic: String,
    request: ServiceRequest,
}

/// State shared by the broker callbacks, the bus listener and the workers
struct DispatcherCore {
    config: NotifyConfig,
    factory: SubscriptionFactory,
    index: Arc<SubscriptionIndex>,
    /// Topics held by each client, so a disconnect releases all of them
    clients: DashMap<String, HashMap<String, Arc<Subscription>>>,
}

impl DispatcherCore {
    fn subscribe(&self, client_id: &str, topic: &str) -> std::result::Result<(), SubscriptionRejection> {
        let subscription = match self.factory.parse(topic) {
            Ok(subscription) => Arc::new(subscription),
            Err(rejection) => {
                tracing::warn!(
                    "Rejected subscription of client '{}' to '{}': {}",
                    client_id,
                    topic,
                    rejection
                );
                return Err(rejection);
            }
        };

        {
            let mut topics = self.clients.entry(client_id.to_string()).or_default();
            if topics.contains_key(topic) {
                tracing::debug!("Client '{}' is already subscribed to '{}'", client_id, topic);
                return Ok(());
            }
            topics.insert(topic.to_string(), Arc::clone(&subscription));
        }

        self.index.add_subscription(subscription);
        Ok(())
    }

    fn unsubscribe(&self, client_id: &str, topic: &str) -> bool {
        let removed = self
            .clients
            .get_mut(client_id)
            .and_then(|mut topics| topics.remove(topic));
        self.clients.remove_if(client_id, |_, topics| topics.is_empty());

        match removed {
            Some(subscription) => {
                self.index.remove_subscription(&subscription);
                true
            }
            None => {
                tracing::debug!("Client '{}' was not subscribed to '{}'", client_id, topic);
                false
            }
        }
    }

    fn client_disconnected(&self, client_id: &str) -> usize {
        let Some((_, topics)) = self.clients.remove(client_id) else {
            return 0;
        };

        for subscription in topics.values() {
            self.index.remove_subscription(subscription);
        }
        tracing::debug!(
            "Client '{}' disconnected, released {} subscriptions",
            client_id,
            topics.len()
        );
        topics.len()
    }
}

/// Upstream listener of the notification transport
struct BrokerCallbacks {
    core: Arc<DispatcherCore>,
    create_pool: Arc<WorkerPool<InboundCreate>>,
}

impl BrokerListener for BrokerCallbacks {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        if !self.core.config.inbound_creates {
            return;
        }

        match decode_create(topic, payload) {
            Ok(request) => {
                // A full queue is logged by the pool
                self.create_pool.submit(InboundCreate {
                    topic: topic.to_string(),
                    request,
                });
            }
            Err(reason) => tracing::debug!(
                "Discarding message on '{}': {}; payload: {}",
                topic,
                reason,
                String::from_utf8_lossy(payload)
            ),
        }
    }

    fn on_client_subscribe(&self, client_id: &str, topic: &str) -> std::result::Result<(), String> {
        self.core
            .subscribe(client_id, topic)
            .map_err(|rejection| rejection.to_string())
    }

    fn on_client_unsubscribe(&self, client_id: &str, topic: &str) {
        self.core.unsubscribe(client_id, topic);
    }

    fn on_client_disconnect(&self, client_id: &str) {
        self.core.client_disconnected(client_id);
    }
}

/// Queues change events that have at least one possible subscriber
struct ChangeListener {
    core: Arc<DispatcherCore>,
    changed_pool: Arc<WorkerPool<ChangeEvent>>,
}

impl BusListener for ChangeListener {
    fn on_change(&self, event: &ChangeEvent) {
        if event.event_type == EventType::Delete && self.core.config.publish_deletes.is_empty() {
            tracing::trace!("Not publishing delete of {} {}", event.entity_type(), event.entity.id);
            return;
        }
        if !self.core.index.has_subscriptions(event.entity_type()) {
            return;
        }
        self.changed_pool.submit(event.clone());
    }
}

/// Turn a client publish into a create request.
///
/// The topic names the target collection, e.g. `v1.0/Datastreams(1)/Observations`,
/// and the payload is the JSON entity.
fn decode_create(topic: &str, payload: &[u8]) -> std::result::Result<ServiceRequest, String> {
    if topic.contains('?') {
        return Err("query options are not allowed on a create topic".to_string());
    }

    let (segment, path) = topic
        .split_once('/')
        .ok_or_else(|| "topic has no resource path".to_string())?;
    let version =
        Version::from_segment(segment).ok_or_else(|| format!("unknown version '{}'", segment))?;
    let body = std::str::from_utf8(payload).map_err(|e| format!("payload is not UTF-8: {}", e))?;
    serde_json::from_str::<serde_json::Value>(body)
        .map_err(|e| format!("payload is not JSON: {}", e))?;

    Ok(ServiceRequest::create(version, path, body))
}

struct Running {
    core: Arc<DispatcherCore>,
    transport: Arc<BrokerTransport>,
    changed_pool: Arc<WorkerPool<ChangeEvent>>,
    create_pool: Arc<WorkerPool<InboundCreate>>,
    bus: Arc<dyn MessageBus>,
    embedded: Option<EmbeddedBroker>,
    status: Mutex<Option<StatusReporter>>,
    stopped: AtomicBool,
}

/// Connects the message bus, the subscription index and the broker.
///
/// # Example
///
/// ```rust,ignore
/// let bus = create_message_bus(&config.bus)?;
/// bus.start()?;
/// let broker = create_broker_client(&config.broker_client, &config.broker)?;
/// let dispatcher = NotificationDispatcher::start(config, services, bus.clone(), broker)?;
///
/// // Storage layer, after a mutation:
/// bus.send_change(ChangeEvent::created(entity));
///
/// dispatcher.shutdown();
/// bus.stop();
/// ```
pub struct NotificationDispatcher {
    running: Option<Running>,
}

impl NotificationDispatcher {
    /// Start the dispatcher.
    ///
    /// With `config.enabled` off nothing is started and every other method is
    /// a no-op.
    ///
    /// # Arguments
    /// * `config` - Queues, broker settings and subscription policy
    /// * `services` - Storage, rendering and request execution
    /// * `bus` - Source of change events; the dispatcher registers itself as
    ///   a listener
    /// * `broker` - Client used to publish notifications
    pub fn start(
        config: NotifyConfig,
        services: Services,
        bus: Arc<dyn MessageBus>,
        broker: BrokerBinding,
    ) -> Result<Self> {
        if !config.enabled {
            tracing::info!("Notifications are disabled");
            return Ok(Self { running: None });
        }
        config.validate()?;

        let core = Arc::new(DispatcherCore {
            factory: SubscriptionFactory::new(
                Arc::clone(&services.parser),
                config.allow_filter_in_subscriptions,
            ),
            index: Arc::new(SubscriptionIndex::new()),
            clients: DashMap::new(),
            config,
        });

        let create_pool = {
            let executor = Arc::clone(&services.executor);
            Arc::new(WorkerPool::start(
                "notify-create",
                core.config.create_queue.clone(),
                move |item: InboundCreate| {
                    let body = item.request.body.clone();
                    let response = executor.execute(item.request);
                    if !response.is_success() {
                        tracing::error!(
                            "Create from message on '{}' failed with {}: {}; payload: {}",
                            item.topic,
                            response.code,
                            response.message.as_deref().unwrap_or("no message"),
                            body
                        );
                    }
                    Ok(())
                },
            )?)
        };

        let callbacks = Arc::new(BrokerCallbacks {
            core: Arc::clone(&core),
            create_pool: Arc::clone(&create_pool),
        });
        let transport = Arc::new(BrokerTransport::start(
            "notify",
            broker.client,
            core.config.broker.clone(),
            callbacks,
        )?);

        if transport.reports_client_interest() {
            if core.config.inbound_creates {
                for version in Version::ALL {
                    transport.subscribe(&format!("{}/#", version), core.config.qos)?;
                }
            }
        } else {
            tracing::warn!(
                "Broker client does not report client subscriptions; only topics registered \
                 through the dispatcher are served and inbound creates are off"
            );
        }

        let changed_pool = {
            let core = Arc::clone(&core);
            let transport = Arc::clone(&transport);
            let qos = core.config.qos;
            Arc::new(WorkerPool::start(
                "notify-changed",
                core.config.changed_queue.clone(),
                move |event: ChangeEvent| {
                    publish_matches(&core, &services, &transport, qos, &event);
                    Ok(())
                },
            )?)
        };

        bus.add_listener(Arc::new(ChangeListener {
            core: Arc::clone(&core),
            changed_pool: Arc::clone(&changed_pool),
        }));

        let status = {
            let changed = Arc::clone(&changed_pool);
            let create = Arc::clone(&create_pool);
            let transport = Arc::clone(&transport);
            let bus = Arc::clone(&bus);
            let source: StatusSource = Arc::new(move || {
                let mut statuses = vec![changed.status(), create.status()];
                statuses.extend(transport.pool_statuses());
                statuses.extend(bus.pool_statuses());
                statuses
            });
            StatusReporter::spawn(
                core.config.status_log_interval,
                core.config.stuck_worker_threshold,
                source,
            )?
        };

        tracing::info!("Notification dispatcher started");
        Ok(Self {
            running: Some(Running {
                core,
                transport,
                changed_pool,
                create_pool,
                bus,
                embedded: broker.embedded,
                status: Mutex::new(status),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.running.is_some()
    }

    fn running(&self) -> Result<&Running> {
        self.running
            .as_ref()
            .ok_or(NotifyError::NotRunning("notification dispatcher"))
    }

    /// Register `client_id`'s interest in `topic`.
    ///
    /// Brokers that report client subscriptions call this through the
    /// transport; it is public for brokers that need it registered by other
    /// means.
    pub fn subscribe(&self, client_id: &str, topic: &str) -> Result<()> {
        self.running()?.core.subscribe(client_id, topic)?;
        Ok(())
    }

    /// # Returns
    /// `false` if the client was not subscribed to `topic`
    pub fn unsubscribe(&self, client_id: &str, topic: &str) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.core.unsubscribe(client_id, topic))
    }

    /// Release every subscription of `client_id`
    ///
    /// # Returns
    /// The number of subscriptions released
    pub fn client_disconnected(&self, client_id: &str) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.core.client_disconnected(client_id))
    }

    pub fn index(&self) -> Option<&SubscriptionIndex> {
        self.running.as_ref().map(|running| running.core.index.as_ref())
    }

    /// Number of distinct topics with at least one subscriber
    pub fn topic_count(&self) -> usize {
        self.index().map_or(0, SubscriptionIndex::topic_count)
    }

    /// The embedded broker remote clients attach to, if that is the broker in use
    pub fn embedded_broker(&self) -> Option<&EmbeddedBroker> {
        self.running.as_ref().and_then(|running| running.embedded.as_ref())
    }

    /// Whether the notification broker connection is up
    pub fn is_listening(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.transport.is_listening())
    }

    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        let Some(running) = self.running.as_ref() else {
            return Vec::new();
        };
        let mut statuses = vec![running.changed_pool.status(), running.create_pool.status()];
        statuses.extend(running.transport.pool_statuses());
        statuses.extend(running.bus.pool_statuses());
        statuses
    }

    /// Stop the status reporter, drain the queues and disconnect from the
    /// broker. Later calls do nothing.
    pub fn shutdown(&self) {
        let Some(running) = self.running.as_ref() else {
            return;
        };
        if running.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(status) = running.status.lock().take() {
            status.shutdown();
        }

        let changed = running.changed_pool.shutdown();
        let created = running.create_pool.shutdown();
        running.transport.shutdown();

        tracing::info!(
            "Notification dispatcher stopped ({} topics active; changed queue {:?}; create queue {:?})",
            running.core.index.topic_count(),
            changed,
            created
        );
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("enabled", &self.is_enabled())
            .field("topic_count", &self.topic_count())
            .finish()
    }
}

/// Publish `event` on every matching subscription's topic.
///
/// A subscription whose rendering fails or panics is logged and skipped; the
/// other matches are still published.
fn publish_matches(
    core: &DispatcherCore,
    services: &Services,
    transport: &BrokerTransport,
    qos: QoS,
    event: &ChangeEvent,
) {
    let is_delete = event.event_type == EventType::Delete;
    core.index
        .dispatch(event, services.persistence.as_ref(), |subscription| {
            if is_delete && !core.config.publishes_deletes(subscription.version()) {
                return;
            }

            let rendered =
                panic::catch_unwind(AssertUnwindSafe(|| subscription.format(&event.entity, services)));
            match rendered {
                Ok(Ok(payload)) => {
                    // A full send queue is logged by the pool
                    transport.publish(subscription.topic(), payload, qos);
                }
                Ok(Err(e)) => tracing::error!(
                    "Failed to render {} {} for '{}': {}",
                    event.entity_type(),
                    event.entity.id,
                    subscription.topic(),
                    e
                ),
                Err(_) => tracing::error!(
                    "Rendering {} {} for '{}' panicked",
                    event.entity_type(),
                    event.entity.id,
                    subscription.topic()
                ),
            }
        });
}
