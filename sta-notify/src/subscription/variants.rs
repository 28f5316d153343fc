//! The three subscription kinds.

use sta_model::{ChangeEvent, Entity, EntityId, EventType, PersistenceError, PersistenceManager, Query};

use super::{ChangeMatcher, SubscriptionBase};
use crate::error::NotifyError;
use crate::services::Services;

/// Every entity of a collection, optionally narrowed by `$filter` and
/// rendered with `$select` / `$expand`
#[derive(Debug, Clone)]
pub struct EntitySetSubscription {
    base: SubscriptionBase,
}

impl EntitySetSubscription {
    pub(crate) fn new(base: SubscriptionBase) -> Self {
        Self { base }
    }
}

impl ChangeMatcher for EntitySetSubscription {
    fn base(&self) -> &SubscriptionBase {
        &self.base
    }

    fn matches(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
    ) -> Result<bool, PersistenceError> {
        self.base.matches(event, persistence)
    }

    fn format(&self, entity: &Entity, services: &Services) -> Result<String, NotifyError> {
        let query = self.base.query();
        if query.expand.is_empty() {
            return Ok(services.formatter.format_entity(entity, query)?);
        }

        let expanded = services.persistence.load_expanded(entity, query)?;
        Ok(services.formatter.format_entity(&expanded, query)?)
    }
}

/// A single entity
#[derive(Debug, Clone)]
pub struct EntitySubscription {
    base: SubscriptionBase,
    /// Set when the topic names the entity by id; `None` when it is reached
    /// through a to-one relation and storage has to resolve it
    id: Option<EntityId>,
}

impl EntitySubscription {
    pub(crate) fn new(base: SubscriptionBase, id: Option<EntityId>) -> Self {
        Self { base, id }
    }

    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }
}

impl ChangeMatcher for EntitySubscription {
    fn base(&self) -> &SubscriptionBase {
        &self.base
    }

    fn matches(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
    ) -> Result<bool, PersistenceError> {
        if !self.base.matches(event, persistence)? {
            return Ok(false);
        }
        Ok(self.id.as_ref().map_or(true, |id| *id == event.entity.id))
    }

    fn format(&self, entity: &Entity, services: &Services) -> Result<String, NotifyError> {
        Ok(services.formatter.format_entity(entity, &Query::default())?)
    }
}

/// One property of a single entity. Only events that change the property
/// match, and the payload is the bare value.
#[derive(Debug, Clone)]
pub struct PropertySubscription {
    base: SubscriptionBase,
    id: Option<EntityId>,
    property: String,
}

impl PropertySubscription {
    pub(crate) fn new(base: SubscriptionBase, id: Option<EntityId>, property: String) -> Self {
        Self { base, id, property }
    }

    pub fn property(&self) -> &str {
        &self.property
    }
}

impl ChangeMatcher for PropertySubscription {
    fn base(&self) -> &SubscriptionBase {
        &self.base
    }

    fn matches(
        &self,
        event: &ChangeEvent,
        persistence: &dyn PersistenceManager,
    ) -> Result<bool, PersistenceError> {
        // In-memory checks first; the base match may ask storage
        if event.event_type == EventType::Delete || !event.has_changed(&self.property) {
            return Ok(false);
        }
        if self.id.as_ref().is_some_and(|id| *id != event.entity.id) {
            return Ok(false);
        }
        self.base.matches(event, persistence)
    }

    fn format(&self, entity: &Entity, services: &Services) -> Result<String, NotifyError> {
        Ok(services.formatter.format_property(entity, &self.property)?)
    }
}
