//! Core domain for corridor processing of utility-pipeline GIS data.
//!
//! The pipeline runs in three phases: buffer polygons are generated around
//! input features on a worker pool, overlapping buffers dissolve into
//! merged regions, and the regions persist to a [`RegionStore`] as spatial
//! metadata records. Constructors validate early so downstream phases can
//! rely on their invariants.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod crs;
pub mod error;
pub mod feature;
pub mod geojson;
pub mod geometry;
pub mod merge;
pub mod pipeline;
pub mod schedule;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use buffer::{
    BufferConfig, BufferEngine, BufferError, BufferPolygon, DistancePolicy, DistanceUnit,
};
pub use crs::{Crs, CrsError};
pub use error::ConfigError;
pub use feature::{
    AttributeValue, Attributes, Feature, FeatureCollection, FeatureCollectionError, FeatureId,
};
pub use geojson::GeoJsonError;
pub use geometry::{GeoEngine, GeometryEngine, GeometryError, GeometryOpError};
pub use merge::{MergeConflictError, MergeEngine, MergedRegion};
pub use pipeline::{run_pipeline, JobError, JobReport, PipelineConfig, SkipRecord};
pub use schedule::{
    partition_features, run_buffer_phase, CancellationToken, FailurePolicy, PartitionFailure,
    ScheduleError, SchedulerConfig, TaskError,
};
pub use store::{
    MetadataRecord, PersistenceError, RecordId, RegionStore, RetryPolicy, SpatialPredicate,
};
#[cfg(feature = "store-sqlite")]
pub use store::sqlite::{SqliteRegionStore, SqliteRegionStoreError};
