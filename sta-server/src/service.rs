//! Composition root: wires the store, the message bus and the notification
//! dispatcher together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use broker::EmbeddedBroker;
use sta_notify::{
    create_broker_client, create_message_bus, MessageBus, NotificationDispatcher, Services,
};
use worker_pool::PoolStatus;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::memory::MemoryStore;

/// A running server
pub struct StaServer {
    store: Arc<MemoryStore>,
    bus: Arc<dyn MessageBus>,
    dispatcher: NotificationDispatcher,
    stopped: AtomicBool,
}

impl StaServer {
    /// Start the bus, the store and the dispatcher.
    ///
    /// The bus and broker client are picked by their configuration keys.
    pub fn start(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let notify = config.notify;

        let bus = create_message_bus(&notify.bus)?;
        bus.start()?;

        let store = Arc::new(MemoryStore::new().with_bus(Arc::clone(&bus)));
        let services = Services::new(store.clone(), store.clone());

        let dispatcher = match create_broker_client(&notify.broker_client, &notify.broker)
            .and_then(|broker| NotificationDispatcher::start(notify, services, Arc::clone(&bus), broker))
        {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                bus.stop();
                return Err(e.into());
            }
        };

        tracing::info!("SensorThings server started");
        Ok(Self {
            store,
            bus,
            dispatcher,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// The in-process broker clients attach to, if the embedded broker is used
    pub fn embedded_broker(&self) -> Option<&EmbeddedBroker> {
        self.dispatcher.embedded_broker()
    }

    /// Snapshots of every queue: the bus, plus the dispatcher and broker
    /// queues when notifications are enabled
    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        if self.dispatcher.is_enabled() {
            self.dispatcher.pool_statuses()
        } else {
            self.bus.pool_statuses()
        }
    }

    /// Drain the bus, then stop the dispatcher. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.stop();
        self.dispatcher.shutdown();
        tracing::info!("SensorThings server stopped");
    }
}

impl Drop for StaServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
