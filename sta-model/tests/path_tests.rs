use proptest::prelude::*;
use sta_model::{
    DefaultPathParser, EntityId, EntityType, PathElement, PathParser, ResourcePath, Version,
};

#[test]
fn test_every_navigation_property_is_addressable() {
    let parser = DefaultPathParser::new();

    for entity_type in EntityType::ALL {
        for np in entity_type.navigation_properties() {
            let input = format!("{}(1)/{}", entity_type.set_name(), np.name);
            let path = parser
                .parse_path(Version::V1_1, &input)
                .unwrap_or_else(|e| panic!("{} failed: {}", input, e));

            assert_eq!(path.path_string(), input);
            assert_eq!(path.main_type(), Some(np.target));
            assert_eq!(path.elements[1].via(), Some(np));
            match &path.elements[1] {
                PathElement::Entity { id: None, .. } => assert!(np.to_one),
                PathElement::EntitySet { .. } => assert!(!np.to_one),
                other => panic!("unexpected element {:?}", other),
            }
        }
    }
}

#[test]
fn test_every_property_is_addressable() {
    let parser = DefaultPathParser::new();

    for entity_type in EntityType::ALL {
        for property in entity_type.properties() {
            let input = format!("{}(1)/{}", entity_type.set_name(), property);
            let path = parser.parse_path(Version::V1_0, &input).unwrap();
            assert_eq!(
                path.last(),
                Some(&PathElement::Property {
                    owner: entity_type,
                    name: property.to_string()
                })
            );
        }
    }
}

proptest! {
    #[test]
    fn prop_numeric_ids_render_back(id in any::<i64>()) {
        let input = format!("Datastreams({})/Observations", id);
        let path = DefaultPathParser.parse_path(Version::V1_0, &input).unwrap();
        prop_assert_eq!(path.path_string(), input);
    }

    #[test]
    fn prop_text_ids_render_back(id in "[a-zA-Z0-9' _-]{1,16}") {
        let entity_id = EntityId::Text(id.clone());
        let input = format!("Things({})", entity_id);
        let path = DefaultPathParser.parse_path(Version::V1_0, &input).unwrap();
        prop_assert_eq!(
            path,
            ResourcePath::new(
                Version::V1_0,
                vec![PathElement::Entity {
                    entity_type: EntityType::Thing,
                    id: Some(entity_id),
                    via: None,
                }]
            )
        );
    }
}
