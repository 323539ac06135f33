//! SQLite-backed store implementation for merged regions.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use thiserror::Error;

use crate::feature::{Attributes, FeatureId};
use crate::geojson::{multi_polygon_from_value, multi_polygon_to_value};

use super::{MetadataRecord, PersistenceError, RecordId, RegionStore, RetryPolicy, SpatialPredicate};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS regions (
    id               TEXT PRIMARY KEY,
    geometry         TEXT NOT NULL,
    contributing_ids TEXT NOT NULL,
    attributes       TEXT NOT NULL,
    buffer_distance  REAL NOT NULL,
    min_x            REAL NOT NULL,
    min_y            REAL NOT NULL,
    max_x            REAL NOT NULL,
    max_y            REAL NOT NULL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS regions_bbox ON regions (min_x, max_x, min_y, max_y);
";

/// Error raised when opening or initialising the SQLite database.
#[derive(Debug, Error)]
pub enum SqliteRegionStoreError {
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path}: {source}")]
    OpenDatabase {
        /// Location of the SQLite database on disk.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// Creating the schema failed.
    #[error("failed to initialise region schema: {source}")]
    Initialise {
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
}

/// Region store backed by a single SQLite database.
///
/// Writes go through an upsert keyed on the content-derived record id, with
/// last-writer-wins semantics on `updated_at`. Busy and locked errors are
/// treated as transient and retried with backoff.
pub struct SqliteRegionStore {
    connection: Mutex<Connection>,
    retry: RetryPolicy,
}

impl fmt::Debug for SqliteRegionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteRegionStore")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SqliteRegionStore {
    /// Open (or create) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteRegionStoreError> {
        let path = path.as_ref();
        let connection =
            Connection::open(path).map_err(|source| SqliteRegionStoreError::OpenDatabase {
                path: path.to_path_buf(),
                source,
            })?;
        Self::with_connection(connection)
    }

    /// Open an in-memory store. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, SqliteRegionStoreError> {
        let connection = Connection::open_in_memory().map_err(|source| {
            SqliteRegionStoreError::OpenDatabase {
                path: PathBuf::from(":memory:"),
                source,
            }
        })?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self, SqliteRegionStoreError> {
        connection
            .execute_batch(SCHEMA)
            .map_err(|source| SqliteRegionStoreError::Initialise { source })?;
        Ok(Self {
            connection: Mutex::new(connection),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy used for transient failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of persisted regions.
    pub fn count(&self) -> Result<usize, PersistenceError> {
        let connection = self.lock("count")?;
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM regions", [], |row| row.get(0))
            .map_err(|e| classify("count", &e))?;
        usize::try_from(count).map_err(|_| PersistenceError::Permanent {
            operation: "count",
            message: "negative row count".to_owned(),
        })
    }

    fn lock(
        &self,
        operation: &'static str,
    ) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.connection
            .lock()
            .map_err(|_| PersistenceError::Permanent {
                operation,
                message: "connection mutex poisoned".to_owned(),
            })
    }

    fn try_upsert(
        connection: &Connection,
        record: &MetadataRecord,
    ) -> Result<(), PersistenceError> {
        let row = RegionRow::encode(record)?;
        connection
            .execute(
                "INSERT INTO regions (
                    id, geometry, contributing_ids, attributes, buffer_distance,
                    min_x, min_y, max_x, max_y, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                    geometry = excluded.geometry,
                    contributing_ids = excluded.contributing_ids,
                    attributes = excluded.attributes,
                    buffer_distance = excluded.buffer_distance,
                    min_x = excluded.min_x,
                    min_y = excluded.min_y,
                    max_x = excluded.max_x,
                    max_y = excluded.max_y,
                    updated_at = excluded.updated_at
                 WHERE excluded.updated_at >= regions.updated_at",
                params![
                    row.id,
                    row.geometry,
                    row.contributing_ids,
                    row.attributes,
                    row.buffer_distance,
                    row.min_x,
                    row.min_y,
                    row.max_x,
                    row.max_y,
                    row.created_at,
                    row.updated_at,
                ],
            )
            .map_err(|e| classify("upsert", &e))?;
        Ok(())
    }
}

impl RegionStore for SqliteRegionStore {
    fn upsert(&self, record: &MetadataRecord) -> Result<RecordId, PersistenceError> {
        self.retry.run("upsert", || {
            let connection = self.lock("upsert")?;
            Self::try_upsert(&connection, record)?;
            Ok(record.id.clone())
        })
    }

    fn query(&self, predicate: &SpatialPredicate) -> Result<Vec<MetadataRecord>, PersistenceError> {
        let SpatialPredicate::BoundingBox(bbox) = predicate;
        self.retry.run("query", || {
            let connection = self.lock("query")?;
            let mut statement = connection
                .prepare(
                    "SELECT id, geometry, contributing_ids, attributes, buffer_distance,
                            created_at, updated_at
                     FROM regions
                     WHERE max_x >= ?1 AND min_x <= ?2 AND max_y >= ?3 AND min_y <= ?4
                     ORDER BY id",
                )
                .map_err(|e| classify("query", &e))?;
            let mut rows = statement
                .query(params![bbox.min().x, bbox.max().x, bbox.min().y, bbox.max().y])
                .map_err(|e| classify("query", &e))?;

            let mut records = Vec::new();
            while let Some(row) = rows.next().map_err(|e| classify("query", &e))? {
                records.push(decode_row(row)?);
            }
            Ok(records)
        })
    }

    fn persist_batch(&self, records: &[MetadataRecord]) -> Result<(), PersistenceError> {
        self.retry.run("persist_batch", || {
            let mut connection = self.lock("persist_batch")?;
            let tx = connection
                .transaction()
                .map_err(|e| classify("persist_batch", &e))?;
            for record in records {
                Self::try_upsert(&tx, record)?;
            }
            tx.commit().map_err(|e| classify("persist_batch", &e))?;
            log::info!("persisted batch of {} regions", records.len());
            Ok(())
        })
    }
}

/// Encoded row ready for binding.
struct RegionRow {
    id: String,
    geometry: String,
    contributing_ids: String,
    attributes: String,
    buffer_distance: f64,
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
    created_at: String,
    updated_at: String,
}

impl RegionRow {
    fn encode(record: &MetadataRecord) -> Result<Self, PersistenceError> {
        let bbox = record
            .bounding_box()
            .ok_or_else(|| PersistenceError::Permanent {
                operation: "upsert",
                message: format!("region {} has an empty geometry", record.id),
            })?;
        let geometry = multi_polygon_to_value(&record.geometry).to_string();
        let contributing_ids =
            serde_json::to_string(&record.contributing_ids).map_err(|e| encode_error("upsert", &e))?;
        let attributes =
            serde_json::to_string(&record.attributes).map_err(|e| encode_error("upsert", &e))?;
        Ok(Self {
            id: record.id.as_str().to_owned(),
            geometry,
            contributing_ids,
            attributes,
            buffer_distance: record.buffer_distance,
            min_x: bbox.min().x,
            min_y: bbox.min().y,
            max_x: bbox.max().x,
            max_y: bbox.max().y,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        })
    }
}

fn decode_row(row: &rusqlite::Row<'_>) -> Result<MetadataRecord, PersistenceError> {
    let id: String = row.get(0).map_err(|e| classify("query", &e))?;
    let geometry_json: String = row.get(1).map_err(|e| classify("query", &e))?;
    let ids_json: String = row.get(2).map_err(|e| classify("query", &e))?;
    let attributes_json: String = row.get(3).map_err(|e| classify("query", &e))?;
    let buffer_distance: f64 = row.get(4).map_err(|e| classify("query", &e))?;
    let created_at: String = row.get(5).map_err(|e| classify("query", &e))?;
    let updated_at: String = row.get(6).map_err(|e| classify("query", &e))?;

    let geometry_value =
        serde_json::from_str(&geometry_json).map_err(|e| decode_error(&id, &e))?;
    let geometry = multi_polygon_from_value(&geometry_value).map_err(|e| decode_error(&id, &e))?;
    let contributing_ids: Vec<FeatureId> =
        serde_json::from_str(&ids_json).map_err(|e| decode_error(&id, &e))?;
    let attributes: Attributes =
        serde_json::from_str(&attributes_json).map_err(|e| decode_error(&id, &e))?;

    Ok(MetadataRecord {
        id: RecordId::from_stored(id.clone()),
        geometry,
        contributing_ids,
        attributes,
        buffer_distance,
        created_at: parse_timestamp(&id, &created_at)?,
        updated_at: parse_timestamp(&id, &updated_at)?,
    })
}

fn parse_timestamp(id: &str, value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(id, &e))
}

fn decode_error(id: &str, error: &dyn fmt::Display) -> PersistenceError {
    PersistenceError::Permanent {
        operation: "query",
        message: format!("stored region {id} is malformed: {error}"),
    }
}

fn encode_error(operation: &'static str, error: &dyn fmt::Display) -> PersistenceError {
    PersistenceError::Permanent {
        operation,
        message: error.to_string(),
    }
}

/// Busy and locked databases are contention, everything else is permanent.
fn classify(operation: &'static str, error: &rusqlite::Error) -> PersistenceError {
    let retryable = matches!(
        error.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    );
    if retryable {
        PersistenceError::Transient {
            operation,
            message: error.to_string(),
        }
    } else {
        PersistenceError::Permanent {
            operation,
            message: error.to_string(),
        }
    }
}
