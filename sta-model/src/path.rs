//! Resource paths such as `v1.0/Things(5)/Datastreams`.

use std::fmt;

use crate::entity::{Entity, EntityId, EntityType, NavigationProperty};
use crate::error::PathError;
use crate::service::PathParser;
use crate::version::Version;

/// One segment of a resource path
#[derive(Debug, Clone, PartialEq)]
pub enum PathElement {
    /// A collection, either at the service root or behind a to-many relation
    EntitySet {
        entity_type: EntityType,
        via: Option<&'static NavigationProperty>,
    },
    /// A single entity. `id` is `None` when it is reached through a to-one
    /// relation, e.g. the `Thing` in `Datastreams(1)/Thing`.
    Entity {
        entity_type: EntityType,
        id: Option<EntityId>,
        via: Option<&'static NavigationProperty>,
    },
    /// A plain property of the preceding entity
    Property { owner: EntityType, name: String },
}

impl PathElement {
    /// Entity type this element addresses (the owner, for a property)
    pub fn entity_type(&self) -> EntityType {
        match self {
            PathElement::EntitySet { entity_type, .. } => *entity_type,
            PathElement::Entity { entity_type, .. } => *entity_type,
            PathElement::Property { owner, .. } => *owner,
        }
    }

    /// The relation this element was reached through, if any
    pub fn via(&self) -> Option<&'static NavigationProperty> {
        match self {
            PathElement::EntitySet { via, .. } | PathElement::Entity { via, .. } => *via,
            PathElement::Property { .. } => None,
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::EntitySet { entity_type, via } => {
                f.write_str(via.map_or(entity_type.set_name(), |np| np.name))
            }
            PathElement::Entity {
                entity_type,
                id,
                via,
            } => {
                f.write_str(via.map_or(entity_type.set_name(), |np| np.name))?;
                if let Some(id) = id {
                    write!(f, "({})", id)?;
                }
                Ok(())
            }
            PathElement::Property { name, .. } => f.write_str(name),
        }
    }
}

/// A decoded resource path
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePath {
    pub version: Version,
    pub elements: Vec<PathElement>,
}

impl ResourcePath {
    pub fn new(version: Version, elements: Vec<PathElement>) -> Self {
        Self { version, elements }
    }

    /// Canonical path of a stored entity, e.g. `v1.0/Observations(10)`
    pub fn for_entity(version: Version, entity: &Entity) -> Self {
        Self::new(
            version,
            vec![PathElement::Entity {
                entity_type: entity.entity_type,
                id: Some(entity.id.clone()),
                via: None,
            }],
        )
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.elements.last()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Entity type addressed by the last element
    pub fn main_type(&self) -> Option<EntityType> {
        self.last().map(PathElement::entity_type)
    }

    /// Drop everything in front of the last identified entity.
    ///
    /// An entity with an id is addressable from the service root, so
    /// `Things(5)/Datastreams(3)/Observations` and `Datastreams(3)/Observations`
    /// denote the same resource; the shorter form is kept.
    pub fn compress(&mut self) {
        let last_identified = self
            .elements
            .iter()
            .rposition(|e| matches!(e, PathElement::Entity { id: Some(_), .. }));

        if let Some(index) = last_identified.filter(|index| *index > 0) {
            self.elements.drain(..index);
            if let Some(PathElement::Entity { via, .. }) = self.elements.first_mut() {
                *via = None;
            }
        }
    }

    /// The path without the version prefix
    pub fn path_string(&self) -> String {
        self.elements
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.version, self.path_string())
    }
}

/// Decoder for the SensorThings path grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPathParser;

impl DefaultPathParser {
    pub fn new() -> Self {
        Self
    }
}

impl PathParser for DefaultPathParser {
    fn parse_path(&self, version: Version, path: &str) -> Result<ResourcePath, PathError> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(PathError::Empty);
        }

        let mut elements: Vec<PathElement> = Vec::new();
        for segment in path.split('/') {
            let (name, id) = split_segment(segment)?;
            let element = match elements.last() {
                None => {
                    let entity_type = EntityType::from_set_name(name)
                        .ok_or_else(|| PathError::UnknownEntitySet(name.to_string()))?;
                    match id {
                        Some(id) => PathElement::Entity {
                            entity_type,
                            id: Some(id),
                            via: None,
                        },
                        None => PathElement::EntitySet {
                            entity_type,
                            via: None,
                        },
                    }
                }
                Some(PathElement::Property { name: property, .. }) => {
                    return Err(PathError::PropertyNotLast(property.clone()));
                }
                Some(set @ PathElement::EntitySet { .. }) => {
                    return Err(PathError::NavigationFromCollection(set.to_string()));
                }
                Some(PathElement::Entity { entity_type, .. }) => {
                    next_element(*entity_type, name, id)?
                }
            };
            elements.push(element);
        }

        tracing::trace!("Parsed resource path {}/{}", version, path);
        Ok(ResourcePath::new(version, elements))
    }
}

/// Resolve a segment following a single entity of type `current`
fn next_element(
    current: EntityType,
    name: &str,
    id: Option<EntityId>,
) -> Result<PathElement, PathError> {
    if let Some(np) = current.navigation(name) {
        return match (np.to_one, id) {
            (true, Some(_)) => Err(PathError::UnexpectedId(name.to_string())),
            (true, None) => Ok(PathElement::Entity {
                entity_type: np.target,
                id: None,
                via: Some(np),
            }),
            (false, Some(id)) => Ok(PathElement::Entity {
                entity_type: np.target,
                id: Some(id),
                via: Some(np),
            }),
            (false, None) => Ok(PathElement::EntitySet {
                entity_type: np.target,
                via: Some(np),
            }),
        };
    }

    if id.is_none() && current.has_property(name) {
        return Ok(PathElement::Property {
            owner: current,
            name: name.to_string(),
        });
    }

    Err(PathError::UnknownSegment {
        segment: name.to_string(),
        entity_type: current,
    })
}

/// Split `Things(5)` into `("Things", Some(5))`
fn split_segment(segment: &str) -> Result<(&str, Option<EntityId>), PathError> {
    let Some(open) = segment.find('(') else {
        return Ok((segment, None));
    };
    if !segment.ends_with(')') {
        return Err(PathError::InvalidId(segment.to_string()));
    }

    let literal = &segment[open + 1..segment.len() - 1];
    let id = EntityId::parse_literal(literal)
        .ok_or_else(|| PathError::InvalidId(literal.to_string()))?;
    Ok((&segment[..open], Some(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(path: &str) -> Result<ResourcePath, PathError> {
        DefaultPathParser.parse_path(Version::V1_0, path)
    }

    #[rstest]
    #[case("Things", "v1.0/Things")]
    #[case("Things(5)", "v1.0/Things(5)")]
    #[case("Things(5)/Datastreams", "v1.0/Things(5)/Datastreams")]
    #[case("Datastreams(1)/Thing", "v1.0/Datastreams(1)/Thing")]
    #[case("Observations(10)/result", "v1.0/Observations(10)/result")]
    #[case("Things('a-b')/Locations", "v1.0/Things('a-b')/Locations")]
    fn test_parse_and_render(#[case] input: &str, #[case] rendered: &str) {
        let path = parse(input).unwrap();
        assert_eq!(path.to_string(), rendered);
    }

    #[test]
    fn test_parse_structure() {
        let path = parse("Things(5)/Datastreams").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(
            path.elements[0],
            PathElement::Entity {
                entity_type: EntityType::Thing,
                id: Some(EntityId::Long(5)),
                via: None,
            }
        );
        match &path.elements[1] {
            PathElement::EntitySet { entity_type, via } => {
                assert_eq!(*entity_type, EntityType::Datastream);
                assert_eq!(via.map(|np| np.name), Some("Datastreams"));
            }
            other => panic!("unexpected element {:?}", other),
        }
        assert_eq!(path.main_type(), Some(EntityType::Datastream));
    }

    #[rstest]
    #[case("", PathError::Empty)]
    #[case("Widgets", PathError::UnknownEntitySet("Widgets".to_string()))]
    #[case("Things/Datastreams", PathError::NavigationFromCollection("Things".to_string()))]
    #[case("Datastreams(1)/Thing(2)", PathError::UnexpectedId("Thing".to_string()))]
    #[case("Observations(1)/result/foo", PathError::PropertyNotLast("result".to_string()))]
    #[case("Things(x)", PathError::InvalidId("x".to_string()))]
    #[case("Things(5", PathError::InvalidId("Things(5".to_string()))]
    fn test_parse_errors(#[case] input: &str, #[case] expected: PathError) {
        assert_eq!(parse(input).unwrap_err(), expected);
    }

    #[test]
    fn test_unknown_property() {
        let error = parse("Observations(10)/colour").unwrap_err();
        assert!(matches!(
            error,
            PathError::UnknownSegment { entity_type: EntityType::Observation, .. }
        ));
    }

    #[test]
    fn test_compress_keeps_last_identified_entity() {
        let mut path = parse("Things(5)/Datastreams(3)/Observations").unwrap();
        path.compress();
        assert_eq!(path.to_string(), "v1.0/Datastreams(3)/Observations");
        assert_eq!(path.elements[0].via(), None);

        let mut path = parse("Things(5)/Datastreams").unwrap();
        path.compress();
        assert_eq!(path.to_string(), "v1.0/Things(5)/Datastreams");

        let mut path = parse("Datastreams(1)/Thing/Locations").unwrap();
        path.compress();
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_path_for_entity() {
        let entity = Entity::new(EntityType::Observation, 10);
        let path = ResourcePath::for_entity(Version::V1_1, &entity);
        assert_eq!(path.to_string(), "v1.1/Observations(10)");
    }
}
