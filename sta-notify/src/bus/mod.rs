//! Message buses carrying change events from the storage layer to the
//! notification dispatcher.
//!
//! - [`InternalMessageBus`]: in-process, one queue and worker pool.
//! - [`MqttMessageBus`]: events travel as JSON over a broker topic, so every
//!   node of a cluster sees the changes made on any node.

mod internal;
mod mqtt;

pub use internal::InternalMessageBus;
pub use mqtt::MqttMessageBus;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use sta_model::ChangeEvent;
use worker_pool::PoolStatus;

use crate::error::Result;

/// Receives change events from a bus
pub trait BusListener: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

/// Transport for change events
pub trait MessageBus: Send + Sync {
    /// Start queues and connections. Events sent before `start` are dropped.
    fn start(&self) -> Result<()>;

    /// Queue an event for delivery to all listeners.
    ///
    /// # Returns
    /// `false` if the event was dropped
    fn send_change(&self, event: ChangeEvent) -> bool;

    fn add_listener(&self, listener: Arc<dyn BusListener>);

    /// Drain queues and disconnect. Later calls do nothing.
    fn stop(&self);

    fn pool_statuses(&self) -> Vec<PoolStatus>;
}

/// Listeners of one bus, shared with its workers
#[derive(Default, Clone)]
pub(crate) struct Listeners {
    inner: Arc<RwLock<Vec<Arc<dyn BusListener>>>>,
}

impl Listeners {
    /// # Returns
    /// `true` if this is the first listener
    pub(crate) fn add(&self, listener: Arc<dyn BusListener>) -> bool {
        let mut listeners = self.inner.write();
        listeners.push(listener);
        listeners.len() == 1
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Hand `event` to every listener. A panicking listener is logged and
    /// the others still receive the event.
    pub(crate) fn deliver(&self, event: &ChangeEvent) {
        let listeners: Vec<Arc<dyn BusListener>> = self.inner.read().clone();
        for listener in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_change(event)));
            if outcome.is_err() {
                tracing::error!(
                    "Bus listener panicked on {} {} ({:?})",
                    event.entity_type(),
                    event.entity.id,
                    event.event_type
                );
            }
        }
    }
}
