//! Matching through the subscription index, without a broker.

use std::sync::Arc;

use mockall::mock;
use mockall::predicate::always;
use proptest::prelude::*;
use sta_model::{
    ChangeEvent, DefaultPathParser, Entity, EntityId, EntityType, PersistenceError, PersistenceManager,
    Query, ResourcePath,
};
use sta_notify::{ChangeMatcher, Subscription, SubscriptionFactory, SubscriptionIndex};

mock! {
    pub Storage {}

    impl PersistenceManager for Storage {
        fn entity_matches(
            &self,
            path: &ResourcePath,
            query: &Query,
            entity: &Entity,
        ) -> Result<bool, PersistenceError>;

        fn load_expanded(&self, entity: &Entity, query: &Query) -> Result<Entity, PersistenceError>;
    }
}

fn subscription(topic: &str) -> Arc<Subscription> {
    let factory = SubscriptionFactory::new(Arc::new(DefaultPathParser::new()), true);
    Arc::new(factory.parse(topic).unwrap())
}

/// Storage that must not be consulted
fn untouched_storage() -> MockStorage {
    let mut storage = MockStorage::new();
    storage.expect_entity_matches().never();
    storage.expect_load_expanded().never();
    storage
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A child-collection subscription is notified exactly when the changed
    /// entity points at its parent.
    #[test]
    fn prop_direct_parent_matches_iff_related(
        parent in 1i64..20,
        related in proptest::option::of(1i64..20),
    ) {
        let index = SubscriptionIndex::new();
        index.add_subscription(subscription(&format!("v1.0/Things({})/Datastreams", parent)));

        let mut datastream = Entity::new(EntityType::Datastream, 100);
        if let Some(thing) = related {
            datastream = datastream.with_link("Thing", thing);
        }

        let storage = untouched_storage();
        let matched = index.matching(&ChangeEvent::created(datastream), &storage);
        prop_assert_eq!(matched.len(), usize::from(related == Some(parent)));
    }

    /// Adding a topic n times and removing it n times leaves nothing behind.
    #[test]
    fn prop_refcount_balances(clients in 1usize..8) {
        let index = SubscriptionIndex::new();
        let topic = "v1.1/Observations(3)/result";

        for i in 0..clients {
            prop_assert_eq!(index.add_subscription(subscription(topic)), i == 0);
        }
        prop_assert_eq!(index.topic_count(), 1);

        for i in 0..clients {
            prop_assert_eq!(index.remove_subscription(&subscription(topic)), i + 1 == clients);
        }
        prop_assert_eq!(index.topic_count(), 0);
        prop_assert!(!index.has_subscriptions(EntityType::Observation));
    }
}

#[test]
fn test_filter_subscription_consults_storage() {
    let index = SubscriptionIndex::new();
    index.add_subscription(subscription("v1.0/Observations?$filter=result gt 20"));

    let mut storage = MockStorage::new();
    storage
        .expect_entity_matches()
        .with(always(), always(), always())
        .times(2)
        .returning(|_, _, entity| Ok(entity.id == EntityId::Long(1)));

    let hit = Entity::new(EntityType::Observation, 1);
    let miss = Entity::new(EntityType::Observation, 2);
    assert_eq!(index.matching(&ChangeEvent::created(hit), &storage).len(), 1);
    assert!(index.matching(&ChangeEvent::created(miss), &storage).is_empty());
}

#[test]
fn test_storage_failure_skips_only_that_subscription() {
    let index = SubscriptionIndex::new();
    index.add_subscription(subscription("v1.0/Observations?$filter=result gt 20"));
    index.add_subscription(subscription("v1.0/Observations"));

    let mut storage = MockStorage::new();
    storage
        .expect_entity_matches()
        .times(1)
        .returning(|_, _, _| Err(PersistenceError::Storage("database is down".to_string())));

    let matched = index.matching(
        &ChangeEvent::created(Entity::new(EntityType::Observation, 1)),
        &storage,
    );
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].topic(), "v1.0/Observations");
}

#[test]
fn test_events_of_other_types_do_not_match() {
    let index = SubscriptionIndex::new();
    index.add_subscription(subscription("v1.0/Things"));
    index.add_subscription(subscription("v1.0/Things(5)/Datastreams"));

    let storage = untouched_storage();
    let event = ChangeEvent::created(Entity::new(EntityType::Sensor, 5));
    assert!(index.matching(&event, &storage).is_empty());
    assert!(index.has_subscriptions(EntityType::Datastream));
    assert!(!index.has_subscriptions(EntityType::Sensor));
}

#[test]
fn test_parent_indexed_and_unindexed_both_match() {
    let index = SubscriptionIndex::new();
    index.add_subscription(subscription("v1.0/Things(5)/Datastreams"));
    index.add_subscription(subscription("v1.0/Datastreams"));
    index.add_subscription(subscription("v1.0/Datastreams(1)"));
    assert_eq!(index.topic_count(), 3);

    let storage = untouched_storage();
    let event = ChangeEvent::created(Entity::new(EntityType::Datastream, 1).with_link("Thing", 5));
    let mut topics: Vec<String> = index
        .matching(&event, &storage)
        .iter()
        .map(|s| s.topic().to_string())
        .collect();
    topics.sort();
    assert_eq!(
        topics,
        vec!["v1.0/Datastreams", "v1.0/Datastreams(1)", "v1.0/Things(5)/Datastreams"]
    );
}

#[test]
fn test_property_topic_checks_changed_fields_before_storage() {
    let index = SubscriptionIndex::new();
    index.add_subscription(subscription("v1.0/Datastreams(1)/Thing/name"));

    let thing = Entity::new(EntityType::Thing, 5).with_property("name", "Station");
    let untouched = untouched_storage();
    let described = ChangeEvent::updated(thing.clone(), ["description"]);
    assert!(index.matching(&described, &untouched).is_empty());
    assert!(index
        .matching(&ChangeEvent::deleted(thing.clone()), &untouched)
        .is_empty());

    let mut storage = MockStorage::new();
    storage
        .expect_entity_matches()
        .times(1)
        .returning(|_, _, _| Ok(true));
    let renamed = ChangeEvent::updated(thing, ["name"]);
    assert_eq!(index.matching(&renamed, &storage).len(), 1);
}
