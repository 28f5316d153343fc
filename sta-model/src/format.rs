//! JSON rendering of entities.

use serde_json::{Map, Value};

use crate::entity::{Entity, Expanded};
use crate::error::FormatError;
use crate::query::Query;
use crate::service::EntityFormatter;

/// Renders entities as SensorThings JSON objects
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Build the JSON object for `entity`, honouring `$select` and `$expand`
    pub fn entity_value(&self, entity: &Entity, query: &Query) -> Value {
        let mut object = Map::new();

        if query.selects("id") || query.selects("@iot.id") {
            object.insert("@iot.id".to_string(), entity.id.to_json());
        }

        for (name, value) in &entity.properties {
            if query.selects(name) {
                object.insert(name.clone(), value.clone());
            }
        }

        for name in query.expand_names() {
            let rendered = match entity.expanded.get(name) {
                Some(Expanded::One(related)) => self.entity_value(related, &Query::default()),
                Some(Expanded::Many(related)) => Value::Array(
                    related
                        .iter()
                        .map(|e| self.entity_value(e, &Query::default()))
                        .collect(),
                ),
                None => continue,
            };
            object.insert(name.to_string(), rendered);
        }

        Value::Object(object)
    }
}

impl EntityFormatter for JsonFormatter {
    fn format_entity(&self, entity: &Entity, query: &Query) -> Result<String, FormatError> {
        Ok(serde_json::to_string(&self.entity_value(entity, query))?)
    }

    fn format_property(&self, entity: &Entity, property: &str) -> Result<String, FormatError> {
        if !entity.entity_type.has_property(property) {
            return Err(FormatError::UnknownProperty {
                entity_type: entity.entity_type,
                property: property.to_string(),
            });
        }
        let value = entity.property(property).unwrap_or(&Value::Null);
        Ok(serde_json::to_string(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use serde_json::json;

    fn datastream() -> Entity {
        Entity::new(EntityType::Datastream, 1)
            .with_property("name", "Temperature")
            .with_property("description", "Outdoor temperature")
            .with_link("Thing", 5)
            .with_expanded(
                "Thing",
                Expanded::One(Box::new(
                    Entity::new(EntityType::Thing, 5).with_property("name", "Weather station"),
                )),
            )
    }

    #[test]
    fn test_full_entity() {
        let formatter = JsonFormatter::new();
        let rendered = formatter.format_entity(&datastream(), &Query::default()).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(
            value,
            json!({
                "@iot.id": 1,
                "name": "Temperature",
                "description": "Outdoor temperature"
            })
        );
    }

    #[test]
    fn test_select_and_expand() {
        let formatter = JsonFormatter::new();
        let query = Query::parse("$select=name&$expand=Thing").unwrap();
        let value = formatter.entity_value(&datastream(), &query);
        assert_eq!(
            value,
            json!({
                "name": "Temperature",
                "Thing": {"@iot.id": 5, "name": "Weather station"}
            })
        );
    }

    #[test]
    fn test_bare_property() {
        let formatter = JsonFormatter::new();
        let observation = Entity::new(EntityType::Observation, 10).with_property("result", 21.5);
        assert_eq!(formatter.format_property(&observation, "result").unwrap(), "21.5");
        assert_eq!(
            formatter.format_property(&observation, "resultTime").unwrap(),
            "null"
        );
        assert!(formatter.format_property(&observation, "colour").is_err());
    }
}
