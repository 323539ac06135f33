//! Persistence interface for merged regions.
//!
//! Stores hold spatial metadata records keyed by a content hash of their
//! geometry, so re-running a job upserts the same rows instead of
//! duplicating them. Backends implement [`RegionStore`]; the bundled SQLite
//! backend lives in [`sqlite`] behind the `store-sqlite` feature.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geo::{BoundingRect, MultiPolygon, Rect};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::feature::{Attributes, FeatureId};
use crate::merge::MergedRegion;

#[cfg(feature = "store-sqlite")]
pub mod sqlite;

/// Content-derived identifier for a merged region.
///
/// Two regions with the same geometry (coordinates rounded to nanometre
/// precision) share an id, which is what makes repeated persists idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    /// Derive the id from a region geometry.
    #[must_use]
    pub fn from_geometry(geometry: &MultiPolygon<f64>) -> Self {
        let mut hasher = Sha256::new();
        for polygon in geometry {
            hasher.update(b"P");
            hash_ring(&mut hasher, polygon.exterior());
            for interior in polygon.interiors() {
                hasher.update(b"I");
                hash_ring(&mut hasher, interior);
            }
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// Wrap an id read back from a store.
    #[must_use]
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    /// The hex digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_ring(hasher: &mut Sha256, ring: &geo::LineString<f64>) {
    for coord in ring.coords() {
        // Round to 1e-9 so float noise below the engine's tolerance does not
        // change the identity of a region.
        hasher.update(format!("{:.9},{:.9};", coord.x, coord.y).as_bytes());
    }
}

/// A merged region in its persisted form.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    /// Content-derived record id.
    pub id: RecordId,
    /// Region geometry.
    pub geometry: MultiPolygon<f64>,
    /// Sorted ids of the contributing source features.
    pub contributing_ids: Vec<FeatureId>,
    /// Reconciled attributes.
    pub attributes: Attributes,
    /// Largest contributing buffer distance, in CRS units.
    pub buffer_distance: f64,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl MetadataRecord {
    /// Build the persisted form of a merged region, timestamped `now`.
    #[must_use]
    pub fn from_region(region: &MergedRegion, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::from_geometry(&region.geometry),
            geometry: region.geometry.clone(),
            contributing_ids: region.contributing_ids.clone(),
            attributes: region.attributes.clone(),
            buffer_distance: region.buffer_distance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Axis-aligned bounding box of the geometry, if it is non-empty.
    #[must_use]
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// Spatial filter for store queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialPredicate {
    /// Records whose bounding box intersects the given box.
    BoundingBox(Rect<f64>),
}

/// Store failure, classified by whether a retry can help.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PersistenceError {
    /// Contention or a momentary outage; safe to retry.
    #[error("transient store failure during {operation}: {message}")]
    Transient {
        /// The store operation that failed.
        operation: &'static str,
        /// Backend-reported detail.
        message: String,
    },
    /// Schema violations, corruption, or anything a retry cannot fix.
    #[error("store failure during {operation}: {message}")]
    Permanent {
        /// The store operation that failed.
        operation: &'static str,
        /// Backend-reported detail.
        message: String,
    },
}

impl PersistenceError {
    /// Whether retrying the operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Bounded retry with exponential backoff for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Run `operation`, retrying transient failures up to the attempt limit.
    ///
    /// # Errors
    /// Returns the last error once attempts are exhausted, and permanent
    /// errors immediately.
    pub fn run<T>(
        &self,
        name: &'static str,
        mut operation: impl FnMut() -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < attempts => {
                    log::warn!("{name} attempt {attempt}/{attempts} failed, retrying: {error}");
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Storage backend for merged-region metadata.
pub trait RegionStore {
    /// Insert the record, or update it in place if its id already exists.
    ///
    /// Later writes win: an existing row is only replaced when the incoming
    /// `updated_at` is not older than the stored one, and `created_at` is
    /// preserved from the first write. Returns the record's id.
    fn upsert(&self, record: &MetadataRecord) -> Result<RecordId, PersistenceError>;

    /// Fetch records matching a spatial predicate, sorted by id.
    fn query(&self, predicate: &SpatialPredicate) -> Result<Vec<MetadataRecord>, PersistenceError>;

    /// Persist a batch of records.
    ///
    /// The default implementation upserts one record at a time; backends
    /// with transactions override this so a batch lands atomically.
    fn persist_batch(&self, records: &[MetadataRecord]) -> Result<(), PersistenceError> {
        for record in records {
            let _ = self.upsert(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord};
    use rstest::rstest;
    use std::cell::Cell;

    fn unit_square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]])
    }

    #[rstest]
    fn identical_geometry_yields_identical_ids() {
        assert_eq!(
            RecordId::from_geometry(&unit_square()),
            RecordId::from_geometry(&unit_square())
        );
    }

    #[rstest]
    fn sub_tolerance_noise_does_not_change_the_id() {
        // Perturb a coordinate by far less than the rounding precision.
        let noisy = MultiPolygon::new(vec![polygon![
            (x: 0.0 + 1e-12, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0 + 1e-12, y: 0.0),
        ]]);
        assert_eq!(
            RecordId::from_geometry(&unit_square()),
            RecordId::from_geometry(&noisy)
        );
    }

    #[rstest]
    fn different_geometry_yields_different_ids() {
        let shifted = MultiPolygon::new(vec![polygon![
            (x: 5.0, y: 0.0),
            (x: 6.0, y: 0.0),
            (x: 6.0, y: 1.0),
            (x: 5.0, y: 1.0),
            (x: 5.0, y: 0.0),
        ]]);
        assert_ne!(
            RecordId::from_geometry(&unit_square()),
            RecordId::from_geometry(&shifted)
        );
    }

    #[rstest]
    fn record_bounding_box_covers_the_geometry() {
        let region = MergedRegion {
            geometry: unit_square(),
            contributing_ids: vec![1],
            attributes: Attributes::new(),
            buffer_distance: 2.0,
        };
        let record = MetadataRecord::from_region(&region, Utc::now());
        let bbox = record.bounding_box().expect("non-empty geometry");
        assert_eq!(bbox.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(bbox.max(), Coord { x: 1.0, y: 1.0 });
    }

    #[rstest]
    fn retry_policy_retries_transient_failures() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result = policy.run("upsert", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(PersistenceError::Transient {
                    operation: "upsert",
                    message: "database is locked".to_owned(),
                })
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls.get(), 3);
    }

    #[rstest]
    fn retry_policy_fails_permanent_errors_immediately() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy.run("upsert", || {
            calls.set(calls.get() + 1);
            Err(PersistenceError::Permanent {
                operation: "upsert",
                message: "malformed schema".to_owned(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[rstest]
    fn retry_policy_gives_up_after_the_attempt_limit() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), _> = policy.run("upsert", || {
            calls.set(calls.get() + 1);
            Err(PersistenceError::Transient {
                operation: "upsert",
                message: "database is locked".to_owned(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }
}
