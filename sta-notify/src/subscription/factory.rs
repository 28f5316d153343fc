//! Turns broker topics into subscriptions.

use std::sync::Arc;

use sta_model::{EntityType, PathElement, PathError, PathParser, Query, ResourcePath, Version};

use super::{
    EntitySetSubscription, EntitySubscription, MatchStrategy, PropertySubscription, Subscription,
    SubscriptionBase,
};
use crate::error::SubscriptionRejection;

/// Parses topics of the form `vX.Y/<resource-path>[?<query-options>]`.
///
/// Parsing is pure: nothing is registered, so a rejected topic leaves no
/// state behind.
#[derive(Clone)]
pub struct SubscriptionFactory {
    parser: Arc<dyn PathParser>,
    allow_filter: bool,
}

impl SubscriptionFactory {
    /// # Arguments
    /// * `parser` - Decodes the path part of a topic
    /// * `allow_filter` - Accept `$filter` on entity set topics
    pub fn new(parser: Arc<dyn PathParser>, allow_filter: bool) -> Self {
        Self {
            parser,
            allow_filter,
        }
    }

    /// Parse `topic` into a subscription.
    ///
    /// # Returns
    /// * `Ok(Subscription)` of the kind given by the last path element
    /// * `Err(SubscriptionRejection)` with a reason fit for the client
    pub fn parse(&self, topic: &str) -> Result<Subscription, SubscriptionRejection> {
        if topic.contains(['+', '#']) {
            return Err(SubscriptionRejection::Wildcard(topic.to_string()));
        }

        let (path_text, query_text) = topic.split_once('?').unwrap_or((topic, ""));
        let (version_segment, resource) = path_text.split_once('/').unwrap_or((path_text, ""));
        let version = Version::from_segment(version_segment)
            .ok_or_else(|| SubscriptionRejection::UnknownVersion(topic.to_string()))?;

        let invalid_path = |source: PathError| SubscriptionRejection::InvalidPath {
            topic: topic.to_string(),
            source,
        };
        let mut path = self
            .parser
            .parse_path(version, resource)
            .map_err(invalid_path)?;
        path.compress();

        let query = Query::parse(query_text).map_err(|source| SubscriptionRejection::InvalidQuery {
            topic: topic.to_string(),
            source,
        })?;

        let last = path.last().cloned().ok_or_else(|| invalid_path(PathError::Empty))?;
        let subscription = match last {
            PathElement::EntitySet { entity_type, .. } => {
                if let Some(option) = query.paging_options().first() {
                    return Err(not_allowed(option, &path));
                }
                if query.filter.is_some() && !self.allow_filter {
                    return Err(SubscriptionRejection::FilterNotAllowed);
                }
                if query.filter.as_deref() == Some("") {
                    return Err(SubscriptionRejection::EmptyFilter(topic.to_string()));
                }
                check_names(&query, entity_type)?;
                let strategy = match_strategy(&path, &query);
                Subscription::EntitySet(EntitySetSubscription::new(SubscriptionBase::new(
                    topic,
                    entity_type,
                    path,
                    query,
                    strategy,
                )))
            }
            PathElement::Entity { entity_type, id, .. } => {
                reject_options(&query, &path)?;
                let strategy = match_strategy(&path, &query);
                Subscription::Entity(EntitySubscription::new(
                    SubscriptionBase::new(topic, entity_type, path, query, strategy),
                    id,
                ))
            }
            PathElement::Property { owner, name } => {
                reject_options(&query, &path)?;
                path.elements.pop();
                let id = match path.last() {
                    Some(PathElement::Entity { id, .. }) => id.clone(),
                    _ => None,
                };
                let strategy = match_strategy(&path, &query);
                Subscription::Property(PropertySubscription::new(
                    SubscriptionBase::new(topic, owner, path, query, strategy),
                    id,
                    name,
                ))
            }
        };

        tracing::debug!(
            "Parsed subscription '{}' on {} ({:?})",
            topic,
            subscription.entity_type(),
            subscription_kind(&subscription)
        );
        Ok(subscription)
    }
}

impl std::fmt::Debug for SubscriptionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionFactory")
            .field("allow_filter", &self.allow_filter)
            .finish_non_exhaustive()
    }
}

/// Pick how the common part of a match is decided.
///
/// Direct-parent matching applies to exactly one shape: an identified parent
/// followed by a collection whose inverse relation is to-one, with no
/// `$filter`. `Things(5)/Datastreams` becomes "Datastream/Thing is 5".
fn match_strategy(path: &ResourcePath, query: &Query) -> MatchStrategy {
    if query.filter.is_some() {
        return MatchStrategy::Filter;
    }

    match path.elements.as_slice() {
        [_] => MatchStrategy::Unconditional,
        [PathElement::Entity { id: Some(key), .. }, last @ PathElement::EntitySet { .. }] => {
            match last.via().and_then(|np| np.inverse()) {
                Some(inverse) if inverse.to_one => MatchStrategy::DirectParent {
                    relation: inverse,
                    key: key.clone(),
                },
                _ => MatchStrategy::Filter,
            }
        }
        _ => MatchStrategy::Filter,
    }
}

fn not_allowed(option: &str, path: &ResourcePath) -> SubscriptionRejection {
    SubscriptionRejection::OptionNotAllowed {
        option: option.to_string(),
        target: path.to_string(),
    }
}

/// Every `$select` and `$expand` entry must exist on `entity_type`
fn check_names(query: &Query, entity_type: EntityType) -> Result<(), SubscriptionRejection> {
    let unknown = |option, name: &str| SubscriptionRejection::UnknownProperty {
        option,
        name: name.to_string(),
        entity_type,
    };

    for name in &query.select {
        let known = matches!(name.as_str(), "id" | "@iot.id")
            || entity_type.has_property(name)
            || entity_type.navigation(name).is_some();
        if !known {
            return Err(unknown("$select", name));
        }
    }
    for name in query.expand_names() {
        if entity_type.navigation(name).is_none() {
            return Err(unknown("$expand", name));
        }
    }
    Ok(())
}

/// Single entities and properties take no query options at all
fn reject_options(query: &Query, path: &ResourcePath) -> Result<(), SubscriptionRejection> {
    let mut present = Vec::new();
    if query.filter.is_some() {
        present.push("$filter");
    }
    if !query.select.is_empty() {
        present.push("$select");
    }
    if !query.expand.is_empty() {
        present.push("$expand");
    }
    present.extend(query.paging_options());

    match present.first() {
        Some(option) => Err(not_allowed(option, path)),
        None => Ok(()),
    }
}

fn subscription_kind(subscription: &Subscription) -> &'static str {
    match subscription {
        Subscription::EntitySet(_) => "entity set",
        Subscription::Entity(_) => "entity",
        Subscription::Property(_) => "property",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::ChangeMatcher;
    use rstest::rstest;
    use sta_model::{DefaultPathParser, EntityId};

    fn factory(allow_filter: bool) -> SubscriptionFactory {
        SubscriptionFactory::new(Arc::new(DefaultPathParser::new()), allow_filter)
    }

    #[test]
    fn test_child_collection_uses_direct_parent() {
        let subscription = factory(false).parse("v1.0/Things(5)/Datastreams").unwrap();
        assert!(matches!(subscription, Subscription::EntitySet(_)));
        assert_eq!(subscription.entity_type(), EntityType::Datastream);

        let relation = subscription.parent_relation().unwrap();
        assert_eq!(relation.source, EntityType::Datastream);
        assert_eq!(relation.name, "Thing");
        assert_eq!(subscription.parent_key(), Some(&EntityId::Long(5)));
    }

    #[rstest]
    #[case("v1.0/Things")]
    #[case("v1.0/Observations(10)")]
    #[case("v1.0/Observations(10)/result")]
    fn test_single_hop_topics_are_unconditional(#[case] topic: &str) {
        let subscription = factory(false).parse(topic).unwrap();
        assert_eq!(subscription.base().strategy(), &MatchStrategy::Unconditional);
        assert!(subscription.parent_relation().is_none());
    }

    #[rstest]
    // to-many in both directions
    #[case("v1.0/Things(5)/Locations")]
    // entity reached through a to-one relation
    #[case("v1.0/Datastreams(1)/Thing")]
    #[case("v1.0/Datastreams(1)/Thing/name")]
    // filtered subscriptions are never parent indexed
    #[case("v1.0/Things(5)/Datastreams?$filter=name eq 'x'")]
    fn test_storage_decides_other_shapes(#[case] topic: &str) {
        let subscription = factory(true).parse(topic).unwrap();
        assert_eq!(subscription.base().strategy(), &MatchStrategy::Filter);
        assert!(subscription.parent_key().is_none());
    }

    #[test]
    fn test_long_path_is_compressed() {
        let subscription = factory(false)
            .parse("v1.0/Things(1)/Datastreams(3)/Observations")
            .unwrap();
        assert_eq!(subscription.base().path().to_string(), "v1.0/Datastreams(3)/Observations");
        assert_eq!(subscription.parent_key(), Some(&EntityId::Long(3)));
        // The topic text is kept as given
        assert_eq!(subscription.topic(), "v1.0/Things(1)/Datastreams(3)/Observations");
    }

    #[test]
    fn test_property_subscription() {
        let subscription = factory(false).parse("v1.0/Observations(10)/result").unwrap();
        let Subscription::Property(property) = &subscription else {
            panic!("expected a property subscription");
        };
        assert_eq!(property.property(), "result");
        assert_eq!(subscription.entity_type(), EntityType::Observation);
        assert_eq!(subscription.base().path().to_string(), "v1.0/Observations(10)");
    }

    #[rstest]
    #[case("v1.0/Things?$top=2", "$top")]
    #[case("v1.0/Things?$skip=2", "$skip")]
    #[case("v1.0/Things?$count=true", "$count")]
    #[case("v1.0/Things?$orderby=name", "$orderby")]
    #[case("v1.0/Things(1)?$select=name", "$select")]
    #[case("v1.0/Things(1)/name?$expand=Datastreams", "$expand")]
    fn test_disallowed_options(#[case] topic: &str, #[case] expected: &str) {
        match factory(true).parse(topic) {
            Err(SubscriptionRejection::OptionNotAllowed { option, .. }) => {
                assert_eq!(option, expected)
            }
            other => panic!("expected rejection of {}, got {:?}", expected, other),
        }
    }

    #[test]
    fn test_set_accepts_select_and_expand() {
        let subscription = factory(false)
            .parse("v1.0/Things?$select=name,description&$expand=Datastreams")
            .unwrap();
        assert_eq!(subscription.base().query().select, vec!["name", "description"]);
        assert_eq!(subscription.base().query().expand, vec!["Datastreams"]);
    }

    #[rstest]
    #[case("v1.0/Things?$select=colour", "$select", "colour")]
    #[case("v1.0/Things?$select=name,colour", "$select", "colour")]
    #[case("v1.0/Things?$expand=Bogus", "$expand", "Bogus")]
    #[case("v1.0/Things(1)/Datastreams?$expand=Thing,Things", "$expand", "Things")]
    fn test_unknown_select_and_expand_names(
        #[case] topic: &str,
        #[case] option: &str,
        #[case] name: &str,
    ) {
        match factory(false).parse(topic) {
            Err(SubscriptionRejection::UnknownProperty {
                option: rejected_option,
                name: rejected_name,
                ..
            }) => {
                assert_eq!(rejected_option, option);
                assert_eq!(rejected_name, name);
            }
            other => panic!("expected {} '{}' to be rejected, got {:?}", option, name, other),
        }
    }

    #[rstest]
    #[case("v1.0/Things?$select=@iot.id,name")]
    #[case("v1.0/Things?$select=id,Datastreams")]
    #[case("v1.0/Datastreams?$expand=Observations($top=1),Thing/Locations")]
    fn test_known_select_and_expand_names(#[case] topic: &str) {
        assert!(factory(false).parse(topic).is_ok());
    }

    #[test]
    fn test_empty_filter_rejected() {
        assert!(matches!(
            factory(true).parse("v1.0/Things?$filter="),
            Err(SubscriptionRejection::EmptyFilter(_))
        ));
        assert!(matches!(
            factory(true).parse("v1.0/Things?$filter=%20%20"),
            Err(SubscriptionRejection::EmptyFilter(_))
        ));
    }

    #[test]
    fn test_filter_needs_permission() {
        let topic = "v1.0/Observations?$filter=result gt 5";
        assert_eq!(
            factory(false).parse(topic).unwrap_err(),
            SubscriptionRejection::FilterNotAllowed
        );
        assert!(factory(true).parse(topic).is_ok());
    }

    #[rstest]
    #[case("Things")]
    #[case("v2.0/Things")]
    #[case("sta/Things")]
    fn test_unknown_version_rejected(#[case] topic: &str) {
        assert!(matches!(
            factory(false).parse(topic),
            Err(SubscriptionRejection::UnknownVersion(_))
        ));
    }

    #[rstest]
    #[case("v1.0/Thingies")]
    #[case("v1.0/Things(1)/colour")]
    #[case("v1.0/Things/Datastreams")]
    #[case("v1.0/")]
    fn test_invalid_path_rejected(#[case] topic: &str) {
        assert!(matches!(
            factory(false).parse(topic),
            Err(SubscriptionRejection::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_wildcards_and_bad_queries_rejected() {
        assert!(matches!(
            factory(false).parse("v1.0/#"),
            Err(SubscriptionRejection::Wildcard(_))
        ));
        assert!(matches!(
            factory(false).parse("v1.0/Things?$unknown=1"),
            Err(SubscriptionRejection::InvalidQuery { .. })
        ));
    }
}
