//! Persistence behaviour of the SQLite region store.

use corridor_core::{
    AttributeValue, Attributes, MergedRegion, MetadataRecord, RegionStore, SpatialPredicate,
    SqliteRegionStore,
};
use chrono::Utc;
use geo::{polygon, MultiPolygon};
use rstest::{fixture, rstest};
use tempfile::TempDir;

fn region(min_x: f64, min_y: f64) -> MergedRegion {
    let mut attributes = Attributes::new();
    attributes.insert("material".to_owned(), AttributeValue::Text("steel".into()));
    attributes.insert("psi".to_owned(), AttributeValue::Number(250.0));
    MergedRegion {
        geometry: MultiPolygon::new(vec![polygon![
            (x: min_x, y: min_y),
            (x: min_x + 10.0, y: min_y),
            (x: min_x + 10.0, y: min_y + 10.0),
            (x: min_x, y: min_y + 10.0),
            (x: min_x, y: min_y),
        ]]),
        contributing_ids: vec![1, 2],
        attributes,
        buffer_distance: 15.24,
    }
}

#[fixture]
fn store() -> SqliteRegionStore {
    SqliteRegionStore::open_in_memory().expect("open in-memory store")
}

#[rstest]
fn record_round_trips_through_its_own_bounding_box(store: SqliteRegionStore) {
    let record = MetadataRecord::from_region(&region(20.0, 20.0), Utc::now());
    store.upsert(&record).expect("upsert");

    let bbox = record.bounding_box().expect("non-empty geometry");
    let found = store
        .query(&SpatialPredicate::BoundingBox(bbox))
        .expect("query by own bbox");

    assert_eq!(found, vec![record]);
}

#[rstest]
fn upsert_returns_the_content_derived_id(store: SqliteRegionStore) {
    let record = MetadataRecord::from_region(&region(0.0, 0.0), Utc::now());
    let id = store.upsert(&record).expect("upsert");
    assert_eq!(id, record.id);

    // The same geometry written again maps onto the same row.
    let again = MetadataRecord::from_region(&region(0.0, 0.0), Utc::now());
    assert_eq!(store.upsert(&again).expect("second upsert"), id);
    assert_eq!(store.count().expect("count"), 1);
}

#[rstest]
fn batch_persists_all_or_nothing(store: SqliteRegionStore) {
    let now = Utc::now();
    let records = vec![
        MetadataRecord::from_region(&region(0.0, 0.0), now),
        MetadataRecord::from_region(&region(100.0, 0.0), now),
        MetadataRecord::from_region(&region(200.0, 0.0), now),
    ];
    store.persist_batch(&records).expect("batch persist");
    assert_eq!(store.count().expect("count"), 3);
}

#[rstest]
fn records_survive_closing_and_reopening_the_database() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("regions.db");
    let record = MetadataRecord::from_region(&region(0.0, 0.0), Utc::now());

    {
        let store = SqliteRegionStore::open(&path).expect("open store");
        store.upsert(&record).expect("upsert");
    }

    let reopened = SqliteRegionStore::open(&path).expect("reopen store");
    let bbox = record.bounding_box().expect("non-empty geometry");
    let found = reopened
        .query(&SpatialPredicate::BoundingBox(bbox))
        .expect("query");
    assert_eq!(found, vec![record]);
}
