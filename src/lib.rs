//! Facade crate for the corridor buffer-zone engine.
//!
//! This crate re-exports the core pipeline types and exposes the optional
//! SQLite-backed region store behind a feature flag.

#![forbid(unsafe_code)]

pub use corridor_core::{
    AttributeValue, Attributes, BufferConfig, BufferEngine, BufferError, BufferPolygon,
    CancellationToken, ConfigError, Crs, DistancePolicy, DistanceUnit, FailurePolicy, Feature,
    FeatureCollection, FeatureId, GeoEngine, GeometryEngine, JobError, JobReport,
    MergeConflictError, MergeEngine, MergedRegion, MetadataRecord, PersistenceError,
    PipelineConfig, RecordId, RegionStore, RetryPolicy, SchedulerConfig, SkipRecord,
    SpatialPredicate, run_pipeline,
};

#[cfg(feature = "store-sqlite")]
pub use corridor_core::{SqliteRegionStore, SqliteRegionStoreError};
