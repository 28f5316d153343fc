//! In-memory entity store.
//!
//! Backs the server binary and the end-to-end tests. It answers the storage
//! questions the notification pipeline asks (path membership, `$filter`,
//! `$expand`), executes create requests and reports every mutation on the
//! message bus.
//!
//! Filters are limited to comparisons of a property with a literal, joined by
//! `and`:
//!
//! ```text
//! result gt 20 and resultQuality eq 'good'
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use sta_model::{
    ChangeEvent, DefaultPathParser, Entity, EntityFormatter, EntityId, EntityType, Expanded,
    JsonFormatter, PathElement, PathParser, PersistenceError, PersistenceManager, Query,
    RequestExecutor, RequestType, ResourcePath, ServiceRequest, ServiceResponse,
};
use sta_notify::MessageBus;

type EntityMap = BTreeMap<(EntityType, EntityId), Entity>;

/// Entities held in memory, keyed by type and id
pub struct MemoryStore {
    entities: RwLock<EntityMap>,
    next_id: AtomicI64,
    bus: Option<Arc<dyn MessageBus>>,
    parser: DefaultPathParser,
    formatter: JsonFormatter,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store that reports changes nowhere
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            bus: None,
            parser: DefaultPathParser::new(),
            formatter: JsonFormatter::new(),
        }
    }

    /// Report every mutation on `bus`
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn get(&self, entity_type: EntityType, id: &EntityId) -> Option<Entity> {
        self.entities.read().get(&(entity_type, id.clone())).cloned()
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Store an entity under the id it carries.
    ///
    /// # Returns
    /// * `Ok(entity)` - the stored entity; a created event has been sent
    /// * `Err(PersistenceError::Storage)` if the id is taken
    pub fn insert(&self, entity: Entity) -> Result<Entity, PersistenceError> {
        if let EntityId::Long(id) = entity.id {
            self.next_id.fetch_max(id + 1, Ordering::SeqCst);
        }

        {
            let mut entities = self.entities.write();
            let key = (entity.entity_type, entity.id.clone());
            if entities.contains_key(&key) {
                return Err(PersistenceError::Storage(format!(
                    "{} {} already exists",
                    entity.entity_type, entity.id
                )));
            }
            entities.insert(key, entity.clone());
        }

        tracing::debug!("Stored {} {}", entity.entity_type, entity.id);
        self.emit(ChangeEvent::created(entity.clone()));
        Ok(entity)
    }

    /// Set properties of a stored entity. An update event naming the
    /// properties whose value changed is sent, unless none did.
    pub fn update(
        &self,
        entity_type: EntityType,
        id: &EntityId,
        changes: Map<String, Value>,
    ) -> Result<Entity, PersistenceError> {
        if let Some(unknown) = changes.keys().find(|name| !entity_type.has_property(name)) {
            return Err(PersistenceError::Storage(format!(
                "{} has no property '{}'",
                entity_type, unknown
            )));
        }

        let (updated, changed) = {
            let mut entities = self.entities.write();
            let entity = entities
                .get_mut(&(entity_type, id.clone()))
                .ok_or_else(|| PersistenceError::NotFound(format!("{} {}", entity_type, id)))?;

            let mut changed = BTreeSet::new();
            for (name, value) in changes {
                if entity.properties.get(&name) != Some(&value) {
                    entity.properties.insert(name.clone(), value);
                    changed.insert(name);
                }
            }
            (entity.clone(), changed)
        };

        if !changed.is_empty() {
            self.emit(ChangeEvent::updated(updated.clone(), changed));
        }
        Ok(updated)
    }

    pub fn delete(&self, entity_type: EntityType, id: &EntityId) -> Result<Entity, PersistenceError> {
        let removed = self
            .entities
            .write()
            .remove(&(entity_type, id.clone()))
            .ok_or_else(|| PersistenceError::NotFound(format!("{} {}", entity_type, id)))?;

        self.emit(ChangeEvent::deleted(removed.clone()));
        Ok(removed)
    }

    fn emit(&self, event: ChangeEvent) {
        if let Some(bus) = &self.bus {
            // A dropped event is logged by the bus
            bus.send_change(event);
        }
    }

    fn allocate_id(&self) -> EntityId {
        EntityId::Long(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn create(&self, request: &ServiceRequest) -> ServiceResponse {
        let path = match self.parser.parse_path(request.version, &request.path) {
            Ok(path) => path,
            Err(e) => return ServiceResponse::error(400, e.to_string()),
        };
        let Some(PathElement::EntitySet { entity_type, via }) = path.last().cloned() else {
            return ServiceResponse::error(400, "Create requests must target a collection");
        };

        let body = match serde_json::from_str::<Value>(&request.body) {
            Ok(Value::Object(body)) => body,
            Ok(_) => return ServiceResponse::error(400, "Body must be a JSON object"),
            Err(e) => return ServiceResponse::error(400, format!("Body is not valid JSON: {}", e)),
        };

        let mut entity = Entity::new(entity_type, EntityId::Long(0));
        for (name, value) in body {
            if name.starts_with("@iot.") {
                continue;
            }
            if entity_type.has_property(&name) {
                entity.properties.insert(name, value);
                continue;
            }
            match entity_type.navigation(&name) {
                Some(navigation) if navigation.to_one => {
                    match value.get("@iot.id").and_then(id_from_json) {
                        Some(id) => {
                            entity.links.insert(name, id);
                        }
                        None => {
                            return ServiceResponse::error(
                                400,
                                format!("'{}' must reference an entity by @iot.id", name),
                            )
                        }
                    }
                }
                _ => {
                    return ServiceResponse::error(
                        400,
                        format!("{} has no property '{}'", entity_type, name),
                    )
                }
            }
        }

        // Creating through a parent links the new entity to it
        let parent = path.elements.iter().rev().nth(1);
        if let (Some(navigation), Some(PathElement::Entity { id: Some(parent_id), .. })) =
            (via, parent)
        {
            if let Some(back) = navigation.inverse().filter(|back| back.to_one) {
                entity.links.insert(back.name.to_string(), parent_id.clone());
            }
        }

        {
            let entities = self.entities.read();
            for (name, id) in &entity.links {
                let Some(target) = entity_type.navigation(name).map(|np| np.target) else {
                    continue;
                };
                if !entities.contains_key(&(target, id.clone())) {
                    return ServiceResponse::error(400, format!("{} {} does not exist", target, id));
                }
            }
        }

        entity.id = self.allocate_id();
        let rendered = match self.formatter.format_entity(&entity, &Query::default()) {
            Ok(rendered) => rendered,
            Err(e) => return ServiceResponse::error(500, e.to_string()),
        };
        match self.insert(entity) {
            Ok(_) => ServiceResponse::success(201, rendered),
            Err(e) => ServiceResponse::error(409, e.to_string()),
        }
    }
}

impl PersistenceManager for MemoryStore {
    fn entity_matches(
        &self,
        path: &ResourcePath,
        query: &Query,
        entity: &Entity,
    ) -> Result<bool, PersistenceError> {
        let elements: Vec<PathElement> = path
            .elements
            .iter()
            .filter(|element| !matches!(element, PathElement::Property { .. }))
            .cloned()
            .collect();

        if !in_path(&self.entities.read(), &elements, entity) {
            return Ok(false);
        }
        match &query.filter {
            Some(expression) => evaluate_filter(expression, entity),
            None => Ok(true),
        }
    }

    fn load_expanded(&self, entity: &Entity, query: &Query) -> Result<Entity, PersistenceError> {
        let entities = self.entities.read();
        let mut loaded = entity.clone();

        for name in query.expand_names() {
            let Some(navigation) = entity.entity_type.navigation(name) else {
                tracing::debug!("{} has no relation '{}' to expand", entity.entity_type, name);
                continue;
            };

            let related = if navigation.to_one {
                let target = entity
                    .related_id(navigation)
                    .and_then(|id| entities.get(&(navigation.target, id.clone())));
                match target {
                    Some(target) => Expanded::One(Box::new(target.clone())),
                    None => continue,
                }
            } else {
                let members = match navigation.inverse().filter(|back| back.to_one) {
                    Some(back) => entities
                        .values()
                        .filter(|candidate| {
                            candidate.entity_type == navigation.target
                                && candidate.related_id(back) == Some(&entity.id)
                        })
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                };
                Expanded::Many(members)
            };
            loaded.expanded.insert(name.to_string(), related);
        }

        Ok(loaded)
    }
}

impl RequestExecutor for MemoryStore {
    fn execute(&self, request: ServiceRequest) -> ServiceResponse {
        match request.request_type {
            RequestType::Create => self.create(&request),
            other => ServiceResponse::error(
                501,
                format!("{} requests are not supported by the in-memory store", other),
            ),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entities", &self.len())
            .field("reports_changes", &self.bus.is_some())
            .finish()
    }
}

fn id_from_json(value: &Value) -> Option<EntityId> {
    match value {
        Value::Number(n) => n.as_i64().map(EntityId::Long),
        Value::String(s) => Some(EntityId::Text(s.clone())),
        _ => None,
    }
}

/// Whether `entity` is a member of the resource addressed by `elements`
fn in_path(entities: &EntityMap, elements: &[PathElement], entity: &Entity) -> bool {
    let Some((last, prefix)) = elements.split_last() else {
        return false;
    };
    if last.entity_type() != entity.entity_type {
        return false;
    }
    if let PathElement::Entity { id: Some(id), .. } = last {
        if *id != entity.id {
            return false;
        }
    }

    let Some(via) = last.via() else {
        return prefix.is_empty();
    };
    let Some(parent_element) = prefix.last() else {
        return false;
    };

    // The member points at its parent
    if let Some(back) = via.inverse().filter(|back| back.to_one) {
        let Some(parent_id) = entity.related_id(back) else {
            return false;
        };
        if let PathElement::Entity { id: Some(id), .. } = parent_element {
            if id != parent_id {
                return false;
            }
        }
        return entities
            .get(&(via.source, parent_id.clone()))
            .is_some_and(|parent| in_path(entities, prefix, parent));
    }

    // The parent points at the member
    if via.to_one {
        return entities.values().any(|parent| {
            parent.entity_type == via.source
                && parent.related_id(via) == Some(&entity.id)
                && in_path(entities, prefix, parent)
        });
    }

    tracing::debug!("Membership through many-to-many relation {} is not tracked", via);
    false
}

/// Evaluate comparisons joined by `and` against `entity`
fn evaluate_filter(expression: &str, entity: &Entity) -> Result<bool, PersistenceError> {
    for clause in expression.split(" and ") {
        let unsupported = || PersistenceError::UnsupportedFilter(expression.to_string());

        let mut parts = clause.trim().splitn(3, ' ');
        let (Some(name), Some(operator), Some(literal)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(unsupported());
        };

        let expected = parse_literal(literal.trim()).ok_or_else(unsupported)?;
        let actual = match name {
            "id" | "@iot.id" => entity.id.to_json(),
            _ => entity.property(name).cloned().unwrap_or(Value::Null),
        };

        let ordering = compare(&actual, &expected);
        let holds = match operator {
            "eq" => ordering == Some(CmpOrdering::Equal),
            "ne" => ordering != Some(CmpOrdering::Equal),
            "gt" => ordering == Some(CmpOrdering::Greater),
            "ge" => matches!(ordering, Some(CmpOrdering::Greater | CmpOrdering::Equal)),
            "lt" => ordering == Some(CmpOrdering::Less),
            "le" => matches!(ordering, Some(CmpOrdering::Less | CmpOrdering::Equal)),
            _ => return Err(unsupported()),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn parse_literal(literal: &str) -> Option<Value> {
    if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
        let inner = &literal[1..literal.len() - 1];
        return Some(Value::String(inner.replace("''", "'")));
    }
    match literal {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => literal.parse::<f64>().ok().map(Value::from),
    }
}

fn compare(left: &Value, right: &Value) -> Option<CmpOrdering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(CmpOrdering::Equal),
        _ => None,
    }
}
