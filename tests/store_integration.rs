//! Store-level integration tests: upsert-merge, cascade delete, FTS
//! synchronization, ordering invariants.

use engram::aging::AgingConfig;
use engram::models::{
    DeleteObservationsRequest, EntityInput, Observation, ObservationAdd, RelationInput,
};
use engram::storage::{EntityStore, StoreConfig, WriteOp};
use proptest::prelude::*;

fn store() -> EntityStore {
    EntityStore::in_memory(AgingConfig::default()).unwrap()
}

#[test]
fn upsert_merge_keeps_one_entity_and_appends() {
    // Creating Alice twice merges instead of duplicating
    let store = store();
    store
        .create_entities(vec![
            EntityInput::new("Alice", "person").with_text("a"),
        ])
        .unwrap();
    store
        .create_entities(vec![EntityInput::new("Alice", "human").with_text("b")])
        .unwrap();

    assert_eq!(store.entity_count().unwrap(), 1);
    let alice = store.peek_entity("Alice").unwrap().unwrap();
    assert_eq!(alice.entity_type, "human");
    let texts: Vec<_> = alice
        .observations
        .iter()
        .filter_map(Observation::as_text)
        .collect();
    assert_eq!(texts, vec!["a", "b"]);
}

#[test]
fn cascade_delete_removes_relations() {
    // Deleting A removes A and every relation touching it
    let store = store();
    store
        .create_entities(vec![
            EntityInput::new("A", "t"),
            EntityInput::new("B", "t"),
        ])
        .unwrap();
    store
        .create_relations(vec![RelationInput::new("A", "B", "friend")])
        .unwrap();

    store.delete_entities(vec!["A".to_string()]).unwrap();
    assert!(store.get_entity("A").unwrap().is_none());
    assert_eq!(store.relation_count().unwrap(), 0);
}

#[test]
fn fts_round_trip_and_tokenizer_behavior() {
    // Committed text is immediately searchable; no edit-distance matching
    let store = store();
    store
        .create_entities(vec![EntityInput::new("Sync", "event")
            .with_text("meeting with Bob about Alpha")])
        .unwrap();

    let hits = store.fts_search("Alpha", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Sync");

    assert!(store.fts_search("alfa", 10).unwrap().is_empty());
}

#[test]
fn fts_row_follows_every_mutation() {
    let store = store();
    store
        .create_entities(vec![EntityInput::new("Doc", "note").with_text("gamma rays")])
        .unwrap();
    assert_eq!(store.fts_search("gamma", 10).unwrap().len(), 1);

    store
        .delete_observations(&[DeleteObservationsRequest {
            entity_name: "Doc".to_string(),
            observations: vec![Observation::text("gamma rays")],
        }])
        .unwrap();
    assert!(store.fts_search("gamma", 10).unwrap().is_empty());

    store
        .add_observations(vec![ObservationAdd {
            entity_name: "Doc".to_string(),
            contents: vec![Observation::text("delta waves")],
        }])
        .unwrap();
    assert_eq!(store.fts_search("delta", 10).unwrap().len(), 1);

    store.delete_entities(vec!["Doc".to_string()]).unwrap();
    assert!(store.fts_search("delta", 10).unwrap().is_empty());
}

#[test]
fn get_entity_advances_access_state() {
    let store = store();
    store
        .create_entities(vec![EntityInput::new("Tracked", "t")])
        .unwrap();

    let created = store.peek_entity("Tracked").unwrap().unwrap();
    let first = store.get_entity("Tracked").unwrap().unwrap();
    let second = store.get_entity("Tracked").unwrap().unwrap();

    assert_eq!(created.access_count, 0);
    assert_eq!(first.access_count, 1);
    assert_eq!(second.access_count, 2);
    assert!(second.last_accessed >= created.created_at);
    assert!(second.updated_at >= second.created_at);
}

#[test]
fn grouped_batch_is_all_or_nothing() {
    let store = store();
    let err = store
        .apply_write_ops(&[
            WriteOp::CreateEntities(vec![EntityInput::new("One", "t")]),
            WriteOp::CreateRelations(vec![RelationInput::new("One", "Missing", "x")]),
        ])
        .unwrap_err();
    assert_eq!(err.kind(), "entity_not_found");
    assert_eq!(store.entity_count().unwrap(), 0);
}

#[test]
fn on_disk_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    let config = StoreConfig {
        read_pool_size: 2,
        ..StoreConfig::default()
    };

    {
        let store = EntityStore::open(&path, AgingConfig::default(), &config).unwrap();
        store
            .create_entities(vec![
                EntityInput::new("Durable", "t").with_text("persisted observation"),
            ])
            .unwrap();
    }

    let store = EntityStore::open(&path, AgingConfig::default(), &config).unwrap();
    let entity = store.peek_entity("Durable").unwrap().unwrap();
    assert_eq!(entity.observations.len(), 1);
    assert_eq!(store.fts_search("persisted", 10).unwrap().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prominence_always_within_bounds(
        days_ago in 0_i64..5000,
        access_count in 0_u64..1_000_000,
        weight in 0.0_f64..100.0,
    ) {
        let config = AgingConfig::default();
        let now = 1_700_000_000_i64;
        let p = config.prominence(now - days_ago * 86_400, access_count, weight, now);
        prop_assert!(p >= config.min_prominence);
        prop_assert!(p <= config.max_prominence);
    }

    #[test]
    fn observation_order_is_insertion_order(texts in proptest::collection::vec("[a-z]{1,8}", 1..12)) {
        let store = store();
        let mut input = EntityInput::new("Ordered", "t");
        for text in &texts {
            input = input.with_text(text.clone());
        }
        store.create_entities(vec![input]).unwrap();

        let entity = store.peek_entity("Ordered").unwrap().unwrap();
        let stored: Vec<_> = entity
            .observations
            .iter()
            .filter_map(Observation::as_text)
            .map(ToString::to_string)
            .collect();
        prop_assert_eq!(stored, texts);
    }
}
