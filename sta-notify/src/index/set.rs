//! Reference-counted set of subscriptions.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::subscription::{Subscription, SubscriptionKey};

struct Counted {
    subscription: Arc<Subscription>,
    clients: usize,
}

/// Subscriptions with the number of clients holding each.
///
/// A subscription is present exactly while its count is above zero. Add and
/// remove need no lock beyond the map's own shard locks.
#[derive(Default)]
pub struct SubscriptionSet {
    entries: DashMap<SubscriptionKey, Counted>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one client reference.
    ///
    /// # Returns
    /// `true` if the subscription was not in the set before
    pub fn add(&self, subscription: Arc<Subscription>) -> bool {
        match self.entries.entry(subscription.key()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().clients += 1;
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Counted {
                    subscription,
                    clients: 1,
                });
                true
            }
        }
    }

    /// Drop one client reference.
    ///
    /// # Returns
    /// `true` if that was the last reference and the subscription is gone
    pub fn remove(&self, key: &SubscriptionKey) -> bool {
        let emptied = match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.clients = entry.clients.saturating_sub(1);
                entry.clients == 0
            }
            None => {
                tracing::warn!("Attempted to release subscription {} but it is not registered", key);
                return false;
            }
        };

        // A concurrent add between the decrement and here keeps the entry alive
        emptied && self.entries.remove_if(key, |_, entry| entry.clients == 0).is_some()
    }

    pub fn client_count(&self, key: &SubscriptionKey) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.clients)
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The subscriptions currently in the set, in no particular order
    pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(&entry.subscription))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionFactory;
    use sta_model::DefaultPathParser;

    fn subscription(topic: &str) -> Arc<Subscription> {
        let factory = SubscriptionFactory::new(Arc::new(DefaultPathParser::new()), false);
        Arc::new(factory.parse(topic).unwrap())
    }

    #[test]
    fn test_refcount() {
        let set = SubscriptionSet::new();
        let things = subscription("v1.0/Things");
        let key = things.key();

        assert!(set.add(Arc::clone(&things)));
        assert!(!set.add(Arc::clone(&things)));
        assert_eq!(set.client_count(&key), 2);
        assert_eq!(set.len(), 1);

        assert!(!set.remove(&key));
        assert!(set.contains(&key));
        assert!(set.remove(&key));
        assert!(!set.contains(&key));
        assert!(set.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_harmless() {
        let set = SubscriptionSet::new();
        assert!(!set.remove(&subscription("v1.0/Things").key()));
    }

    #[test]
    fn test_snapshot_holds_each_subscription_once() {
        let set = SubscriptionSet::new();
        set.add(subscription("v1.0/Things"));
        set.add(subscription("v1.0/Things"));
        set.add(subscription("v1.0/Sensors"));

        let mut topics: Vec<String> = set.snapshot().iter().map(|s| s.key().topic).collect();
        topics.sort();
        assert_eq!(topics, vec!["v1.0/Sensors", "v1.0/Things"]);
    }
}
