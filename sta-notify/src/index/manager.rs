//! Per-entity-type subscription storage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sta_model::{ChangeEvent, EntityId, EntityType, NavigationProperty};

use super::set::SubscriptionSet;
use crate::subscription::{ChangeMatcher, Subscription};

/// Subscriptions keyed by the parent their relation must point at.
///
/// All subscriptions in here share one to-one relation, so finding the
/// subscriptions interested in an entity is a single map lookup with the
/// entity's value for that relation.
pub struct ParentIndexedSet {
    relation: &'static NavigationProperty,
    by_parent: RwLock<HashMap<EntityId, SubscriptionSet>>,
}

impl ParentIndexedSet {
    pub fn new(relation: &'static NavigationProperty) -> Self {
        Self {
            relation,
            by_parent: RwLock::new(HashMap::new()),
        }
    }

    pub fn relation(&self) -> &'static NavigationProperty {
        self.relation
    }

    /// # Returns
    /// `true` if the subscription is new to the index
    pub fn add(&self, parent: &EntityId, subscription: Arc<Subscription>) -> bool {
        self.by_parent
            .write()
            .entry(parent.clone())
            .or_default()
            .add(subscription)
    }

    /// # Returns
    /// `true` if the last reference was dropped
    pub fn remove(&self, parent: &EntityId, subscription: &Subscription) -> bool {
        let mut by_parent = self.by_parent.write();
        let Some(set) = by_parent.get(parent) else {
            return false;
        };

        let removed = set.remove(&subscription.key());
        if set.is_empty() {
            by_parent.remove(parent);
        }
        removed
    }

    /// Subscriptions waiting for children of `parent`
    pub fn lookup(&self, parent: &EntityId) -> Vec<Arc<Subscription>> {
        self.by_parent
            .read()
            .get(parent)
            .map(SubscriptionSet::snapshot)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_parent.read().values().map(SubscriptionSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_parent.read().is_empty()
    }
}

/// All subscriptions on one entity type.
///
/// Parent-keyed subscriptions go into one [`ParentIndexedSet`] per relation;
/// the rest share a catch-all set that is matched member by member.
pub struct SubscriptionManager {
    entity_type: EntityType,
    parents: RwLock<Vec<Arc<ParentIndexedSet>>>,
    others: SubscriptionSet,
}

impl SubscriptionManager {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            parents: RwLock::new(Vec::new()),
            others: SubscriptionSet::new(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn parent_set(&self, relation: &'static NavigationProperty) -> Option<Arc<ParentIndexedSet>> {
        self.parents
            .read()
            .iter()
            .find(|set| set.relation() == relation)
            .cloned()
    }

    fn parent_set_or_insert(&self, relation: &'static NavigationProperty) -> Arc<ParentIndexedSet> {
        if let Some(set) = self.parent_set(relation) {
            return set;
        }

        let mut parents = self.parents.write();
        if let Some(set) = parents.iter().find(|set| set.relation() == relation) {
            return Arc::clone(set);
        }
        tracing::debug!("Indexing {} subscriptions by {}", self.entity_type, relation);
        let set = Arc::new(ParentIndexedSet::new(relation));
        parents.push(Arc::clone(&set));
        set
    }

    /// # Returns
    /// `true` if the subscription is new to this manager
    pub fn add(&self, subscription: Arc<Subscription>) -> bool {
        match (subscription.parent_relation(), subscription.parent_key().cloned()) {
            (Some(relation), Some(parent)) => {
                self.parent_set_or_insert(relation).add(&parent, subscription)
            }
            _ => self.others.add(subscription),
        }
    }

    /// # Returns
    /// `true` if the last reference was dropped
    pub fn remove(&self, subscription: &Subscription) -> bool {
        match (subscription.parent_relation(), subscription.parent_key()) {
            (Some(relation), Some(parent)) => self
                .parent_set(relation)
                .is_some_and(|set| set.remove(parent, subscription)),
            _ => self.others.remove(&subscription.key()),
        }
    }

    /// Subscriptions indexed under the event entity's parents.
    ///
    /// These match without further checks: the index key is the predicate.
    pub fn indexed_matches(&self, event: &ChangeEvent) -> Vec<Arc<Subscription>> {
        let parents: Vec<Arc<ParentIndexedSet>> = self.parents.read().clone();
        parents
            .iter()
            .filter_map(|set| {
                event
                    .entity
                    .related_id(set.relation())
                    .map(|parent| set.lookup(parent))
            })
            .flatten()
            .collect()
    }

    /// Subscriptions that have to be checked one by one
    pub fn unindexed(&self) -> Vec<Arc<Subscription>> {
        self.others.snapshot()
    }

    pub fn len(&self) -> usize {
        let indexed: usize = self.parents.read().iter().map(|set| set.len()).sum();
        indexed + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.others.is_empty() && self.parents.read().iter().all(|set| set.is_empty())
    }
}
