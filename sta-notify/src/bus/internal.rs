use std::sync::Arc;

use parking_lot::RwLock;
use sta_model::ChangeEvent;
use worker_pool::{PoolStatus, QueueSettings, WorkerPool};

use super::{BusListener, Listeners, MessageBus};
use crate::error::Result;

/// In-process bus: one bounded queue whose workers call every listener
pub struct InternalMessageBus {
    settings: QueueSettings,
    listeners: Listeners,
    pool: RwLock<Option<WorkerPool<ChangeEvent>>>,
}

impl InternalMessageBus {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            listeners: Listeners::default(),
            pool: RwLock::new(None),
        }
    }
}

impl MessageBus for InternalMessageBus {
    fn start(&self) -> Result<()> {
        let mut pool = self.pool.write();
        if pool.is_some() {
            return Ok(());
        }

        let listeners = self.listeners.clone();
        *pool = Some(WorkerPool::start(
            "bus-changed",
            self.settings.clone(),
            move |event: ChangeEvent| {
                listeners.deliver(&event);
                Ok(())
            },
        )?);
        tracing::info!("Internal message bus started");
        Ok(())
    }

    fn send_change(&self, event: ChangeEvent) -> bool {
        match self.pool.read().as_ref() {
            Some(pool) => pool.submit(event),
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
        self.listeners.add(listener);
    }

    fn stop(&self) {
        if let Some(pool) = self.pool.write().take() {
            let report = pool.shutdown();
            tracing::info!("Internal message bus stopped ({:?})", report);
        }
    }

    fn pool_statuses(&self) -> Vec<PoolStatus> {
        self.pool.read().iter().map(WorkerPool::status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_events_reach_listeners() {
        let bus = InternalMessageBus::new(QueueSettings::new(1, 10));
        let listener = Arc::new(Recording::default());
        bus.add_listener(listener.clone());
        bus.start().unwrap();

        assert!(bus.send_change(ChangeEvent::created(Entity::new(EntityType::Thing, 1))));

        let deadline = Instant::now() + Duration::from_secs(2);
        while listener.0.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(listener.0.lock().len(), 1);

        bus.stop();
        assert!(bus.pool_statuses().is_empty());
    }

    #[test]
    fn test_events_before_start_are_dropped() {
        let bus = InternalMessageBus::new(QueueSettings::new(1, 10));
        assert!(!bus.send_change(ChangeEvent::created(Entity::new(EntityType::Thing, 1))));
    }
}
