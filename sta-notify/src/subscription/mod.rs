//! Subscriptions and their matching contract.
//!
//! A subscription is created from a topic by the [`SubscriptionFactory`] and
//! comes in three kinds, one per shape of the topic's path:
//!
//! - [`EntitySetSubscription`]: `v1.0/Things(5)/Datastreams`, every entity of a
//!   collection
//! - [`EntitySubscription`]: `v1.0/Observations(10)`, one entity
//! - [`PropertySubscription`]: `v1.0/Observations(10)/result`, one property
//!   of one entity
//!
//! All kinds share the [`ChangeMatcher`] contract. The first matching step is
//! common to all of them and decided by the [`MatchStrategy`] the factory
//! picked; kind-specific checks follow.

pub mod factory;
mod variants;

pub use factory::SubscriptionFactory;
pub use variants::{EntitySetSubscription, EntitySubscription, PropertySubscription};

use std::fmt;

use sta_model::{
    ChangeEvent, Entity, EntityId, EntityType, NavigationProperty, PersistenceError,
    PersistenceManager, Query, ResourcePath, Version,
};

use crate::error::NotifyError;
use crate::services::Services;

/// Identity of a subscription inside the index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub topic: String,
    pub entity_type: EntityType,
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.topic, self.entity_type)
    }
}

/// How the common part of a match is decided
#[derive(Debug, Clone, PartialEq)]
pub enum MatchStrategy {
    /// The entity's to-one `relation` must point at `key`. Decided in memory
    /// and used to index the subscription by parent key.
    DirectParent {
        relation: &'static NavigationProperty,
        key: EntityId,
    },
    /// Storage decides whether the entity is part of the subscribed path
    Filter,
    /// Every entity of the type passes
    Unconditional,
}

/// State shared by every subscription kind
#[derive(Debug, Clone)]
pub struct SubscriptionBase {
    topic: String,
    entity_type: EntityType,
    /// Path of the matching entities, without a trailing property
    path: ResourcePath,
    query: Query,
    strategy: MatchStrategy,
}

impl SubscriptionBase {
    pub(crate) fn new(
        topic: impl Into<String>,
        entity_type: EntityType,
        path: ResourcePath,
        query: Query,
        strategy: MatchStrategy,
    ) -> Self {
        Self {
            topic: topic.into(),
            entity_type,
            path,
            query,
            strategy,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn version(&self) -> Version {
        self.path.version
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn strategy(&self) -> &MatchStrategy {
        &self.strategy
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey {
            topic: self.topic.clone(),
            entity_type: self.entity_type,
        }
    }

    /// Type check, then the strategy's check.
    ///
    /// Only [`MatchStrategy::Filter`] touches storage.
    pub fn matches(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
    ) -> Result<bool, PersistenceError> {
        if event.entity_type() != self.entity_type {
            return Ok(false);
        }

        match &self.strategy {
            MatchStrategy::DirectParent { relation, key } => {
                Ok(event.entity.related_id(relation) == Some(key))
            }
            MatchStrategy::Filter => {
                persistence.entity_matches(&self.path, &self.query, &event.entity)
            }
            MatchStrategy::Unconditional => Ok(true),
        }
    }
}

/// The contract every subscription kind implements
pub trait ChangeMatcher {
    fn base(&self) -> &SubscriptionBase;

    /// Whether `event` is of interest to this subscription
    fn matches(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
    ) -> Result<bool, PersistenceError>;

    /// Render the payload published for `entity`
    fn format(&self, entity: &Entity, services: &Services) -> Result<String, NotifyError>;

    fn topic(&self) -> &str {
        self.base().topic()
    }

    /// The to-one relation this subscription is indexed by, if any
    fn parent_relation(&self) -> Option<&'static NavigationProperty> {
        match self.base().strategy() {
            MatchStrategy::DirectParent { relation, .. } => Some(*relation),
            _ => None,
        }
    }

    /// Primary key of the fixed parent, if any
    fn parent_key(&self) -> Option<&EntityId> {
        match self.base().strategy() {
            MatchStrategy::DirectParent { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// A subscription of any kind
#[derive(Debug, Clone)]
pub enum Subscription {
    EntitySet(EntitySetSubscription),
    Entity(EntitySubscription),
    Property(PropertySubscription),
}

impl Subscription {
    pub fn key(&self) -> SubscriptionKey {
        self.base().key()
    }

    pub fn entity_type(&self) -> EntityType {
        self.base().entity_type()
    }

    pub fn version(&self) -> Version {
        self.base().version()
    }

    fn inner(&self) -> &dyn ChangeMatcher {
        match self {
            Subscription::EntitySet(s) => s,
            Subscription::Entity(s) => s,
            Subscription::Property(s) => s,
        }
    }
}

impl ChangeMatcher for Subscription {
    fn base(&self) -> &SubscriptionBase {
        self.inner().base()
    }

    fn matches(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
    ) -> Result<bool, PersistenceError> {
        self.inner().matches(event, persistence)
    }

    fn format(&self, entity: &Entity, services: &Services) -> Result<String, NotifyError> {
        self.inner().format(entity, services)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}
