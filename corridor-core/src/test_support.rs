//! Shared helpers for unit and integration tests.
//!
//! Available to downstream crates behind the `test-support` feature.

use std::sync::Mutex;

use geo::{BoundingRect, Rect};

use crate::store::{MetadataRecord, PersistenceError, RecordId, RegionStore, SpatialPredicate};

/// In-memory [`RegionStore`] with the same upsert semantics as the SQLite
/// backend: content-id keyed, last-writer-wins by `updated_at`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<MetadataRecord>>,
}

impl MemoryStore {
    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored records, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MetadataRecord> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        records.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

impl RegionStore for MemoryStore {
    fn upsert(&self, record: &MetadataRecord) -> Result<RecordId, PersistenceError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| PersistenceError::Permanent {
                operation: "upsert",
                message: "store mutex poisoned".to_owned(),
            })?;
        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            if record.updated_at >= existing.updated_at {
                let created_at = existing.created_at;
                *existing = record.clone();
                existing.created_at = created_at;
            }
        } else {
            records.push(record.clone());
        }
        Ok(record.id.clone())
    }

    fn query(&self, predicate: &SpatialPredicate) -> Result<Vec<MetadataRecord>, PersistenceError> {
        let SpatialPredicate::BoundingBox(bbox) = predicate;
        let records = self
            .records
            .lock()
            .map_err(|_| PersistenceError::Permanent {
                operation: "query",
                message: "store mutex poisoned".to_owned(),
            })?;
        let mut found: Vec<MetadataRecord> = records
            .iter()
            .filter(|record| {
                record
                    .geometry
                    .bounding_rect()
                    .is_some_and(|rect| boxes_intersect(&rect, bbox))
            })
            .cloned()
            .collect();
        found.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

fn boxes_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.max().x >= b.min().x && a.min().x <= b.max().x && a.max().y >= b.min().y && a.min().y <= b.max().y
}
