//! Active subscriptions, indexed for matching change events.
//!
//! This module contains the [`SubscriptionIndex`] which handles:
//! - One [`SubscriptionManager`] per entity type
//! - Reference counting, so many clients on one topic share one subscription
//! - Counting active topics
//! - Two-tier dispatch: parent-key lookups first, then member-by-member
//!   matching of everything that could not be indexed

mod manager;
mod set;

pub use manager::{ParentIndexedSet, SubscriptionManager};
pub use set::SubscriptionSet;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sta_model::{ChangeEvent, EntityType, PersistenceManager};

use crate::subscription::{ChangeMatcher, Subscription};

/// Active subscriptions of all entity types
pub struct SubscriptionIndex {
    managers: HashMap<EntityType, SubscriptionManager>,
    topic_count: AtomicUsize,
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self {
            managers: EntityType::ALL
                .into_iter()
                .map(|entity_type| (entity_type, SubscriptionManager::new(entity_type)))
                .collect(),
            topic_count: AtomicUsize::new(0),
        }
    }

    fn manager(&self, entity_type: EntityType) -> Option<&SubscriptionManager> {
        self.managers.get(&entity_type)
    }

    /// Register one client's interest in `subscription`.
    ///
    /// # Returns
    /// `true` if this is the first client on the topic
    pub fn add_subscription(&self, subscription: Arc<Subscription>) -> bool {
        let Some(manager) = self.manager(subscription.entity_type()) else {
            return false;
        };

        let key = subscription.key();
        let is_new = manager.add(subscription);
        if is_new {
            let count = self.topic_count.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::info!("Subscription added: {} ({} active topics)", key, count);
        } else {
            tracing::debug!("Additional client on {}", key);
        }
        is_new
    }

    /// Drop one client's interest in `subscription`.
    ///
    /// # Returns
    /// `true` if that was the last client and the topic is gone
    pub fn remove_subscription(&self, subscription: &Subscription) -> bool {
        let Some(manager) = self.manager(subscription.entity_type()) else {
            return false;
        };

        let removed = manager.remove(subscription);
        if removed {
            let count = self.topic_count.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            tracing::info!(
                "Subscription removed: {} ({} active topics)",
                subscription.key(),
                count
            );
        }
        removed
    }

    /// Number of distinct (topic, entity type) pairs with at least one client
    pub fn topic_count(&self) -> usize {
        self.topic_count.load(Ordering::Acquire)
    }

    pub fn has_subscriptions(&self, entity_type: EntityType) -> bool {
        self.manager(entity_type).is_some_and(|manager| !manager.is_empty())
    }

    /// Hand every subscription interested in `event` to `notify`.
    ///
    /// Parent-indexed subscriptions are taken as matches outright; the others
    /// are checked one by one. A failing check is logged and skipped without
    /// affecting the other subscriptions.
    ///
    /// # Returns
    /// The number of subscriptions notified
    pub fn dispatch<F>(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
        mut notify: F,
    ) -> usize
    where
        F: FnMut(&Arc<Subscription>),
    {
        let Some(manager) = self.manager(event.entity_type()) else {
            return 0;
        };

        let mut notified = 0;
        for subscription in manager.indexed_matches(event) {
            notify(&subscription);
            notified += 1;
        }

        for subscription in manager.unindexed() {
            match subscription.matches(event, persistence) {
                Ok(true) => {
                    notify(&subscription);
                    notified += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        "Failed to match {} {} against '{}': {}",
                        event.entity_type(),
                        event.entity.id,
                        subscription.topic(),
                        e
                    );
                }
            }
        }

        tracing::trace!(
            "{} {} matched {} subscriptions",
            event.entity_type(),
            event.entity.id,
            notified
        );
        notified
    }

    /// Subscriptions interested in `event`, collected
    pub fn matching(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
    ) -> Vec<Arc<Subscription>> {
        let mut found = Vec::new();
        self.dispatch(event, persistence, |subscription| found.push(Arc::clone(subscription)));
        found
    }
}

impl std::fmt::Debug for SubscriptionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionIndex")
            .field("topic_count", &self.topic_count())
            .finish_non_exhaustive()
    }
}
