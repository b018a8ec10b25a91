//! Integration tests for the PostgreSQL catalogue store
//!
//! Tests verify:
//! 1. Schema migration is repeatable
//! 2. Catalogue creation and reuse
//! 3. Bulk insert, lookup by source id and partial update
//! 4. Import run audit records
//! 5. Duplicate source ids are rejected, not silently dropped
//!
//! Prerequisites:
//! - PostgreSQL reachable at DATABASE_URL (set in .env)
//!
//! Run with: cargo test --test postgres_store -- --ignored --test-threads=1

use std::env;

use chrono::{Duration, TimeZone, Utc};
use quakeingest_service::error::StoreError;
use quakeingest_service::model::{CatalogueEvent, EventUpdate, ImportRun, QuakeRow};
use quakeingest_service::store::{CatalogueStore, PgStore};

async fn setup_store() -> PgStore {
    dotenv::dotenv().ok();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&database_url).await.expect("Failed to connect to test database");
    store.migrate().await.expect("migration failed");
    store
}

fn unique_source_id(tag: &str) -> String {
    format!("test-{}-{}", tag, uuid::Uuid::new_v4().simple())
}

fn magnitude_update(magnitude: f64) -> EventUpdate {
    EventUpdate {
        time: None,
        latitude: None,
        longitude: None,
        depth_km: None,
        magnitude: Some(magnitude),
        magnitude_type: None,
        event_type: None,
        location_name: None,
        focal_mechanism: None,
        updated_at: Utc::now(),
    }
}

fn event(catalogue_id: &str, source_id: &str, magnitude: f64) -> CatalogueEvent {
    let row = QuakeRow::new(
        source_id,
        Utc.with_ymd_and_hms(2024, 10, 24, 1, 0, 0).unwrap(),
        -41.3,
        174.8,
        magnitude,
    );
    CatalogueEvent::from_row(catalogue_id, &row, None, Utc::now())
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_migrate_twice_is_harmless() {
    let store = setup_store().await;
    store.migrate().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_catalogue_is_reused_by_id() {
    let store = setup_store().await;
    let created = store.get_or_create_catalogue(None, "pg test catalogue").await.unwrap();
    let again = store
        .get_or_create_catalogue(Some(&created.id), "ignored name")
        .await
        .unwrap();
    assert_eq!(again.id, created.id);
    assert_eq!(again.name, "pg test catalogue");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_insert_find_and_update_event() {
    let store = setup_store().await;
    let catalogue = store.get_or_create_catalogue(None, "pg test catalogue").await.unwrap();
    let source_id = unique_source_id("event");

    let stored = event(&catalogue.id, &source_id, 4.2);
    store.bulk_insert_events(&[stored.clone()]).await.unwrap();

    let found = store
        .find_event_by_source_id(&catalogue.id, &source_id)
        .await
        .unwrap()
        .expect("event should be stored");
    assert_eq!(found.id, stored.id);
    assert_eq!(found.magnitude, 4.2);

    let update = magnitude_update(4.6);
    store.update_event(&stored.id, &update).await.unwrap();
    let found = store.find_event_by_source_id(&catalogue.id, &source_id).await.unwrap().unwrap();
    assert_eq!(found.magnitude, 4.6);
    assert_eq!(found.latitude, -41.3, "untouched fields keep their values");

    let batch = store
        .find_events_by_source_ids(&catalogue.id, &[source_id.clone(), "missing".to_string()])
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert!(batch.contains_key(&source_id));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_update_unknown_event_is_not_found() {
    let store = setup_store().await;
    let update = magnitude_update(3.0);
    let err = store
        .update_event(&uuid::Uuid::new_v4().to_string(), &update)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_import_run_round_trip() {
    let store = setup_store().await;
    let catalogue = store.get_or_create_catalogue(None, "pg test runs").await.unwrap();
    let now = Utc::now();
    let run = ImportRun {
        id: uuid::Uuid::new_v4().to_string(),
        catalogue_id: catalogue.id.clone(),
        start_time: now - Duration::hours(24),
        end_time: now,
        started_at: now,
        finished_at: now,
        total_fetched: 3,
        new_count: 1,
        updated_count: 1,
        skipped_count: 1,
        errors: vec!["insert x: invalid".to_string()],
    };
    store.record_import_run(&run).await.unwrap();

    let runs = store.list_import_runs(&catalogue.id).await.unwrap();
    let stored = runs.iter().find(|r| r.id == run.id).expect("run recorded");
    assert_eq!(stored.new_count, 1);
    assert_eq!(stored.errors, run.errors);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_source_id_rejects_whole_batch() {
    let store = setup_store().await;
    let catalogue = store.get_or_create_catalogue(None, "pg test catalogue").await.unwrap();
    let existing_id = unique_source_id("dup");
    let fresh_id = unique_source_id("fresh");

    store
        .bulk_insert_events(&[event(&catalogue.id, &existing_id, 3.0)])
        .await
        .unwrap();

    // Same source id under a new row id, as a concurrent run would write it.
    let batch = [
        event(&catalogue.id, &fresh_id, 3.2),
        event(&catalogue.id, &existing_id, 3.1),
    ];
    let err = store.bulk_insert_events(&batch).await.unwrap_err();
    match err {
        StoreError::Duplicate { source_id, catalogue_id } => {
            assert_eq!(source_id, existing_id);
            assert_eq!(catalogue_id, catalogue.id);
        }
        other => panic!("expected Duplicate, got {other:?}"),
    }

    assert!(
        store.find_event_by_source_id(&catalogue.id, &fresh_id).await.unwrap().is_none(),
        "the batch is rolled back"
    );
    let kept = store.find_event_by_source_id(&catalogue.id, &existing_id).await.unwrap().unwrap();
    assert_eq!(kept.magnitude, 3.0);
}
