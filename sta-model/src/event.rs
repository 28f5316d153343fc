//! Change events emitted by the storage layer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityType};

/// Kind of mutation an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Create,
    Update,
    Delete,
}

/// A mutation of one stored entity.
///
/// `changed_fields` holds property and navigation property names. For a
/// create it lists everything the new entity carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: Entity,
    pub event_type: EventType,
    #[serde(default)]
    pub changed_fields: BTreeSet<String>,
}

impl ChangeEvent {
    pub fn created(entity: Entity) -> Self {
        let changed_fields = entity
            .properties
            .keys()
            .chain(entity.links.keys())
            .cloned()
            .collect();
        Self {
            entity,
            event_type: EventType::Create,
            changed_fields,
        }
    }

    pub fn updated<I, S>(entity: Entity, changed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity,
            event_type: EventType::Update,
            changed_fields: changed_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn deleted(entity: Entity) -> Self {
        Self {
            entity,
            event_type: EventType::Delete,
            changed_fields: BTreeSet::new(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity.entity_type
    }

    pub fn has_changed(&self, field: &str) -> bool {
        self.changed_fields.contains(field)
    }
}
