//! End-to-end job orchestration: buffer phase, barrier, merge, persist.
//!
//! Per-feature problems aggregate into the [`JobReport`]; only job-level
//! failures raise. Persistence happens in a single store transaction after
//! the merge, so a cancelled or failed job never leaves a half-written
//! store behind.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::buffer::BufferEngine;
use crate::error::ConfigError;
use crate::feature::{FeatureCollection, FeatureId};
use crate::geometry::GeometryEngine;
use crate::merge::{MergeConflictError, MergeEngine};
use crate::schedule::{
    run_buffer_phase, CancellationToken, PartitionFailure, ScheduleError, SchedulerConfig,
};
use crate::store::{MetadataRecord, PersistenceError, RegionStore};

/// Everything a job needs beyond its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Buffer-phase configuration.
    pub buffer: crate::buffer::BufferConfig,
    /// Optional polygon layer subtracted from every buffer before merging.
    pub exclusion: Option<geo::MultiPolygon<f64>>,
    /// Scheduler tuning.
    pub scheduler: SchedulerConfig,
}

impl PipelineConfig {
    /// A fixed-distance pipeline with default scheduling.
    #[must_use]
    pub fn fixed_distance(distance: f64) -> Self {
        Self {
            buffer: crate::buffer::BufferConfig::fixed(distance),
            exclusion: None,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// One feature set aside during loading, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRecord {
    /// Id of the skipped feature, when one could be read.
    pub feature_id: Option<FeatureId>,
    /// Human-readable reason for the skip.
    pub reason: String,
}

impl fmt::Display for SkipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.feature_id {
            Some(id) => write!(f, "feature {id} skipped: {}", self.reason),
            None => write!(f, "feature skipped: {}", self.reason),
        }
    }
}

/// Outcome counts for a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    /// Features accepted by the loader.
    pub loaded: usize,
    /// Features set aside during loading.
    pub skipped: Vec<SkipRecord>,
    /// Buffer polygons produced.
    pub buffered: usize,
    /// Partitions that failed under the best-effort policy.
    pub failed: Vec<PartitionFailure>,
    /// Merged regions produced.
    pub merged: usize,
    /// Records written to the store.
    pub persisted: usize,
}

impl JobReport {
    /// One-line human summary, printed by the CLI on completion.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "loaded {} features ({} skipped), buffered {} ({} partitions failed), merged into {} regions, persisted {}",
            self.loaded,
            self.skipped.len(),
            self.buffered,
            self.failed.len(),
            self.merged,
            self.persisted,
        )
    }
}

/// Job-level failure. Carries the class the CLI maps to exit codes.
#[derive(Debug, Error)]
pub enum JobError {
    /// Invalid configuration, caught before any feature work.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The buffer phase failed.
    #[error("buffer phase failed: {0}")]
    Processing(ScheduleError),
    /// The merge phase failed.
    #[error("merge phase failed: {0}")]
    Merge(#[from] MergeConflictError),
    /// The store rejected the results.
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
    /// The job was cancelled; nothing was persisted.
    #[error("job cancelled before completion")]
    Cancelled,
}

impl From<ScheduleError> for JobError {
    fn from(error: ScheduleError) -> Self {
        match error {
            ScheduleError::Cancelled => Self::Cancelled,
            ScheduleError::Config(config) => Self::Config(config),
            other => Self::Processing(other),
        }
    }
}

/// Run the full buffer → merge → persist pipeline over a loaded collection.
///
/// `skipped` carries the loader's skip records through to the report. The
/// geometry engine is cloned once for the merge phase; buffer workers share
/// one instance behind an [`Arc`].
///
/// # Errors
/// Returns a [`JobError`] when any phase fails at the job level;
/// per-partition failures under [`BestEffort`](crate::schedule::FailurePolicy::BestEffort)
/// land in the report instead.
pub fn run_pipeline<E, S>(
    collection: FeatureCollection,
    skipped: Vec<SkipRecord>,
    config: &PipelineConfig,
    engine: E,
    store: &S,
    token: &CancellationToken,
) -> Result<JobReport, JobError>
where
    E: GeometryEngine + Clone + Send + Sync + 'static,
    S: RegionStore + ?Sized,
{
    let merge_engine = MergeEngine::new(engine.clone());
    let mut buffer_engine = BufferEngine::new(engine, config.buffer.clone())?;
    if let Some(zone) = &config.exclusion {
        buffer_engine = buffer_engine.with_exclusion(zone.clone());
    }
    let buffer_engine = Arc::new(buffer_engine);

    let (features, _crs) = collection.into_parts();
    let loaded = features.len();
    log::info!("starting job over {loaded} features ({} skipped)", skipped.len());

    let (buffers, failed) = run_buffer_phase(&buffer_engine, features, &config.scheduler, token)?;
    let buffered = buffers.len();

    let regions = merge_engine.merge(&buffers)?;
    let merged = regions.len();

    if token.is_cancelled() {
        log::warn!("job cancelled after merge; discarding {merged} regions");
        return Err(JobError::Cancelled);
    }

    let now = Utc::now();
    let records: Vec<MetadataRecord> = regions
        .iter()
        .map(|region| MetadataRecord::from_region(region, now))
        .collect();
    store.persist_batch(&records)?;

    let report = JobReport {
        loaded,
        skipped,
        buffered,
        failed,
        merged,
        persisted: records.len(),
    };
    log::info!("{}", report.summary());
    Ok(report)
}
