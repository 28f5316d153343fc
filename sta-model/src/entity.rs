//! Entity types, their relations and entity instances.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The entity types of the SensorThings data model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Thing,
    Location,
    HistoricalLocation,
    Datastream,
    MultiDatastream,
    Sensor,
    ObservedProperty,
    Observation,
    FeatureOfInterest,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        EntityType::Thing,
        EntityType::Location,
        EntityType::HistoricalLocation,
        EntityType::Datastream,
        EntityType::MultiDatastream,
        EntityType::Sensor,
        EntityType::ObservedProperty,
        EntityType::Observation,
        EntityType::FeatureOfInterest,
    ];

    /// Singular name, as used for to-one navigation properties
    pub fn name(&self) -> &'static str {
        match self {
            EntityType::Thing => "Thing",
            EntityType::Location => "Location",
            EntityType::HistoricalLocation => "HistoricalLocation",
            EntityType::Datastream => "Datastream",
            EntityType::MultiDatastream => "MultiDatastream",
            EntityType::Sensor => "Sensor",
            EntityType::ObservedProperty => "ObservedProperty",
            EntityType::Observation => "Observation",
            EntityType::FeatureOfInterest => "FeatureOfInterest",
        }
    }

    /// Name of the entity set at the service root, e.g. `Things`
    pub fn set_name(&self) -> &'static str {
        match self {
            EntityType::Thing => "Things",
            EntityType::Location => "Locations",
            EntityType::HistoricalLocation => "HistoricalLocations",
            EntityType::Datastream => "Datastreams",
            EntityType::MultiDatastream => "MultiDatastreams",
            EntityType::Sensor => "Sensors",
            EntityType::ObservedProperty => "ObservedProperties",
            EntityType::Observation => "Observations",
            EntityType::FeatureOfInterest => "FeaturesOfInterest",
        }
    }

    pub fn from_set_name(name: &str) -> Option<EntityType> {
        Self::ALL.into_iter().find(|t| t.set_name() == name)
    }

    pub fn from_name(name: &str) -> Option<EntityType> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Plain (non-navigation) properties of this type, `id` excluded
    pub fn properties(&self) -> &'static [&'static str] {
        match self {
            EntityType::Thing => &["name", "description", "properties"],
            EntityType::Location => &["name", "description", "encodingType", "location", "properties"],
            EntityType::HistoricalLocation => &["time"],
            EntityType::Datastream => &[
                "name",
                "description",
                "unitOfMeasurement",
                "observationType",
                "observedArea",
                "phenomenonTime",
                "resultTime",
                "properties",
            ],
            EntityType::MultiDatastream => &[
                "name",
                "description",
                "unitOfMeasurements",
                "observationType",
                "multiObservationDataTypes",
                "observedArea",
                "phenomenonTime",
                "resultTime",
                "properties",
            ],
            EntityType::Sensor => &["name", "description", "encodingType", "metadata", "properties"],
            EntityType::ObservedProperty => &["name", "definition", "description", "properties"],
            EntityType::Observation => &[
                "phenomenonTime",
                "resultTime",
                "result",
                "resultQuality",
                "validTime",
                "parameters",
            ],
            EntityType::FeatureOfInterest => {
                &["name", "description", "encodingType", "feature", "properties"]
            }
        }
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties().contains(&name)
    }

    /// Navigation properties leaving this type
    pub fn navigation_properties(&self) -> impl Iterator<Item = &'static NavigationProperty> + '_ {
        NAVIGATION_PROPERTIES
            .iter()
            .filter(move |np| np.source == *self)
    }

    /// Look up a navigation property of this type by name
    pub fn navigation(&self, name: &str) -> Option<&'static NavigationProperty> {
        NAVIGATION_PROPERTIES
            .iter()
            .find(|np| np.source == *self && np.name == name)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A relation from one entity type to another.
///
/// Every relation is listed once per direction; `inverse` names the
/// navigation property of `target` that leads back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NavigationProperty {
    pub source: EntityType,
    pub name: &'static str,
    pub target: EntityType,
    /// True if this relation leads to at most one entity
    pub to_one: bool,
    pub inverse: &'static str,
}

impl NavigationProperty {
    /// The navigation property of the target type that leads back to `source`
    pub fn inverse(&self) -> Option<&'static NavigationProperty> {
        self.target.navigation(self.inverse)
    }
}

impl fmt::Display for NavigationProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.name)
    }
}

const fn nav(
    source: EntityType,
    name: &'static str,
    target: EntityType,
    to_one: bool,
    inverse: &'static str,
) -> NavigationProperty {
    NavigationProperty {
        source,
        name,
        target,
        to_one,
        inverse,
    }
}

use EntityType::*;

static NAVIGATION_PROPERTIES: [NavigationProperty; 24] = [
    nav(Thing, "Locations", Location, false, "Things"),
    nav(Thing, "HistoricalLocations", HistoricalLocation, false, "Thing"),
    nav(Thing, "Datastreams", Datastream, false, "Thing"),
    nav(Thing, "MultiDatastreams", MultiDatastream, false, "Thing"),
    nav(Location, "Things", Thing, false, "Locations"),
    nav(Location, "HistoricalLocations", HistoricalLocation, false, "Locations"),
    nav(HistoricalLocation, "Thing", Thing, true, "HistoricalLocations"),
    nav(HistoricalLocation, "Locations", Location, false, "HistoricalLocations"),
    nav(Datastream, "Thing", Thing, true, "Datastreams"),
    nav(Datastream, "Sensor", Sensor, true, "Datastreams"),
    nav(Datastream, "ObservedProperty", ObservedProperty, true, "Datastreams"),
    nav(Datastream, "Observations", Observation, false, "Datastream"),
    nav(MultiDatastream, "Thing", Thing, true, "MultiDatastreams"),
    nav(MultiDatastream, "Sensor", Sensor, true, "MultiDatastreams"),
    nav(MultiDatastream, "ObservedProperties", ObservedProperty, false, "MultiDatastreams"),
    nav(MultiDatastream, "Observations", Observation, false, "MultiDatastream"),
    nav(Sensor, "Datastreams", Datastream, false, "Sensor"),
    nav(Sensor, "MultiDatastreams", MultiDatastream, false, "Sensor"),
    nav(ObservedProperty, "Datastreams", Datastream, false, "ObservedProperty"),
    nav(ObservedProperty, "MultiDatastreams", MultiDatastream, false, "ObservedProperties"),
    nav(Observation, "Datastream", Datastream, true, "Observations"),
    nav(Observation, "MultiDatastream", MultiDatastream, true, "Observations"),
    nav(Observation, "FeatureOfInterest", FeatureOfInterest, true, "Observations"),
    nav(FeatureOfInterest, "Observations", Observation, false, "FeatureOfInterest"),
];

/// Primary key of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Long(i64),
    Text(String),
}

impl EntityId {
    /// Parse the literal found between parentheses in a path segment:
    /// `5` or `'abc'` (with `''` escaping a quote).
    pub fn parse_literal(literal: &str) -> Option<EntityId> {
        let literal = literal.trim();
        if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
            let inner = &literal[1..literal.len() - 1];
            return Some(EntityId::Text(inner.replace("''", "'")));
        }
        literal.parse::<i64>().ok().map(EntityId::Long)
    }

    /// The id as a JSON value, for `@iot.id`
    pub fn to_json(&self) -> Value {
        match self {
            EntityId::Long(id) => Value::from(*id),
            EntityId::Text(id) => Value::from(id.as_str()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Long(id) => write!(f, "{}", id),
            EntityId::Text(id) => write!(f, "'{}'", id.replace('\'', "''")),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Long(id)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::Text(id.to_string())
    }
}

/// Related entities carried inline with an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expanded {
    One(Box<Entity>),
    Many(Vec<Entity>),
}

/// A stored entity as seen by the notification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub id: EntityId,
    /// Plain properties by name
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Target ids of to-one relations, by navigation property name
    #[serde(default)]
    pub links: BTreeMap<String, EntityId>,
    /// Related entities loaded for `$expand`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expanded: BTreeMap<String, Expanded>,
}

impl Entity {
    pub fn new(entity_type: EntityType, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type,
            id: id.into(),
            properties: Map::new(),
            links: BTreeMap::new(),
            expanded: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the target of a to-one relation
    pub fn with_link(mut self, navigation: impl Into<String>, id: impl Into<EntityId>) -> Self {
        self.links.insert(navigation.into(), id.into());
        self
    }

    pub fn with_expanded(mut self, navigation: impl Into<String>, related: Expanded) -> Self {
        self.expanded.insert(navigation.into(), related);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Primary key of the entity a to-one relation points at, if known
    pub fn related_id(&self, navigation: &NavigationProperty) -> Option<&EntityId> {
        if navigation.source != self.entity_type || !navigation.to_one {
            return None;
        }
        self.links.get(navigation.name).or_else(|| match self.expanded.get(navigation.name) {
            Some(Expanded::One(related)) => Some(&related.id),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_name_round_trip() {
        for entity_type in EntityType::ALL {
            assert_eq!(EntityType::from_set_name(entity_type.set_name()), Some(entity_type));
            assert_eq!(EntityType::from_name(entity_type.name()), Some(entity_type));
        }
        assert_eq!(EntityType::from_set_name("Thing"), None);
    }

    #[test]
    fn test_every_relation_has_an_inverse() {
        for entity_type in EntityType::ALL {
            for np in entity_type.navigation_properties() {
                let inverse = np
                    .inverse()
                    .unwrap_or_else(|| panic!("{} has no inverse", np));
                assert_eq!(inverse.target, np.source);
                assert_eq!(inverse.inverse, np.name);
            }
        }
    }

    #[test]
    fn test_to_one_relations() {
        let thing = EntityType::Datastream.navigation("Thing").unwrap();
        assert!(thing.to_one);
        assert_eq!(thing.target, EntityType::Thing);

        let datastreams = thing.inverse().unwrap();
        assert!(!datastreams.to_one);
        assert_eq!(datastreams.source, EntityType::Thing);

        assert!(EntityType::Thing.navigation("Thing").is_none());
    }

    #[test]
    fn test_entity_id_literals() {
        assert_eq!(EntityId::parse_literal("5"), Some(EntityId::Long(5)));
        assert_eq!(EntityId::parse_literal("'abc'"), Some(EntityId::from("abc")));
        assert_eq!(EntityId::parse_literal("'it''s'"), Some(EntityId::from("it's")));
        assert_eq!(EntityId::parse_literal("abc"), None);

        assert_eq!(EntityId::Long(5).to_string(), "5");
        assert_eq!(EntityId::from("it's").to_string(), "'it''s'");
    }

    #[test]
    fn test_related_id_from_link_or_expansion() {
        let thing_nav = EntityType::Datastream.navigation("Thing").unwrap();
        let sensor_nav = EntityType::Datastream.navigation("Sensor").unwrap();

        let datastream = Entity::new(EntityType::Datastream, 1)
            .with_link("Thing", 5)
            .with_expanded(
                "Sensor",
                Expanded::One(Box::new(Entity::new(EntityType::Sensor, 9))),
            );

        assert_eq!(datastream.related_id(thing_nav), Some(&EntityId::Long(5)));
        assert_eq!(datastream.related_id(sensor_nav), Some(&EntityId::Long(9)));

        let observation_nav = EntityType::Observation.navigation("Datastream").unwrap();
        assert_eq!(datastream.related_id(observation_nav), None);
    }

    #[test]
    fn test_entity_serde() {
        let entity = Entity::new(EntityType::Observation, 10)
            .with_property("result", 21.5)
            .with_link("Datastream", 1);
        let json = serde_json::to_string(&entity).unwrap();
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);
    }
}
