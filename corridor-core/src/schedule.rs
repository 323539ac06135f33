//! Parallel execution of the buffer phase.
//!
//! Features are split into bounded partitions and buffered on a dedicated
//! rayon pool. Results flow back over a channel and are re-sorted by feature
//! id after the barrier, so downstream stages observe the same buffer set no
//! matter how many workers ran or in what order they finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use rayon::ThreadPoolBuilder;
use thiserror::Error;

use crate::buffer::{BufferEngine, BufferError, BufferPolygon};
use crate::error::ConfigError;
use crate::feature::{Feature, FeatureId};
use crate::geometry::GeometryEngine;

/// Upper bound on features per partition when none is configured.
pub const DEFAULT_PARTITION_CAP: usize = 512;

/// What the scheduler does when a partition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the job on the first partition failure.
    #[default]
    FailFast,
    /// Keep going; failed partitions are reported alongside the results.
    BestEffort,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Worker thread count; `None` sizes the pool to the host.
    pub workers: Option<usize>,
    /// Maximum features per partition.
    pub partition_cap: usize,
    /// Behaviour on partition failure.
    pub failure_policy: FailurePolicy,
    /// Maximum wait for any partition to report back.
    pub task_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            partition_cap: DEFAULT_PARTITION_CAP,
            failure_policy: FailurePolicy::default(),
            task_timeout: None,
        }
    }
}

impl SchedulerConfig {
    /// Validate the configuration before the pool is built.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for a zero worker count or partition cap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidWorkerCount);
        }
        if self.partition_cap == 0 {
            return Err(ConfigError::InvalidPartitionCap);
        }
        Ok(())
    }
}

/// Cooperative cancellation flag shared between the caller and workers.
///
/// Workers check the token before starting a partition; cancellation never
/// interrupts a geometry operation already in flight.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A partition that did not produce buffers.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("partition of {} features failed: {error}", feature_ids.len())]
pub struct PartitionFailure {
    /// Ids of every feature in the failed partition.
    pub feature_ids: Vec<FeatureId>,
    /// What went wrong.
    #[source]
    pub error: TaskError,
}

/// Failure of a single partition task.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    /// Buffering the partition failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// The partition did not report back within the configured timeout.
    #[error("no result within {timeout:?}")]
    TimedOut {
        /// The configured wait that elapsed.
        timeout: Duration,
    },
}

/// Job-level scheduling failure.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The scheduler configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The worker pool could not be built.
    #[error("failed to build worker pool: {0}")]
    Pool(String),
    /// A partition failed under the fail-fast policy.
    #[error(transparent)]
    PartitionFailed(PartitionFailure),
    /// The job was cancelled before completion.
    #[error("job cancelled")]
    Cancelled,
    /// Workers disappeared without reporting. Indicates a panicked task.
    #[error("worker channel closed with {pending} partitions outstanding")]
    ChannelClosed {
        /// Partitions that never reported.
        pending: usize,
    },
}

/// Split features into partitions of at most `cap` features each.
///
/// Input order is preserved within and across partitions.
#[must_use]
pub fn partition_features(features: Vec<Feature>, cap: usize) -> Vec<Vec<Feature>> {
    let cap = cap.max(1);
    let mut partitions = Vec::with_capacity(features.len().div_ceil(cap));
    let mut current = Vec::with_capacity(cap.min(features.len()));
    for feature in features {
        current.push(feature);
        if current.len() == cap {
            partitions.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        partitions.push(current);
    }
    partitions
}

/// Buffer every feature in parallel and return the sorted buffer set.
///
/// The call blocks until every partition has reported, failed, or timed
/// out. Returned buffers are sorted by feature id; the accompanying list
/// holds the partitions that failed (always empty under
/// [`FailurePolicy::FailFast`], which surfaces the first failure as an
/// error instead).
///
/// The caller's token is only ever read. Failures and timeouts stop the
/// remaining workers through an internal shutdown flag, so a best-effort
/// run still completes with its surviving results.
///
/// # Errors
/// Returns [`ScheduleError::Cancelled`] when the caller's token fires, and
/// [`ScheduleError::PartitionFailed`] for the first failure under the
/// fail-fast policy.
pub fn run_buffer_phase<E>(
    engine: &Arc<BufferEngine<E>>,
    features: Vec<Feature>,
    config: &SchedulerConfig,
    token: &CancellationToken,
) -> Result<(Vec<BufferPolygon>, Vec<PartitionFailure>), ScheduleError>
where
    E: GeometryEngine + Send + Sync + 'static,
{
    config.validate()?;
    if token.is_cancelled() {
        return Err(ScheduleError::Cancelled);
    }
    if features.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.workers.unwrap_or(0))
        .build()
        .map_err(|e| ScheduleError::Pool(e.to_string()))?;

    let partitions = partition_features(features, config.partition_cap);
    log::info!(
        "buffering {} partitions on {} workers",
        partitions.len(),
        pool.current_num_threads()
    );

    let (sender, receiver) = mpsc::channel();
    let mut pending: Vec<Option<Vec<FeatureId>>> = Vec::with_capacity(partitions.len());
    // Scheduler-internal stop signal; never touches the caller's token.
    let shutdown = CancellationToken::new();

    for (index, partition) in partitions.into_iter().enumerate() {
        pending.push(Some(partition.iter().map(|f| f.id).collect()));
        let engine = Arc::clone(engine);
        let token = token.clone();
        let shutdown = shutdown.clone();
        let sender = sender.clone();
        pool.spawn(move || {
            if token.is_cancelled() || shutdown.is_cancelled() {
                return;
            }
            let result = engine.buffer_partition(&partition);
            // The receiver may have given up on us; a failed send is fine.
            let _ = sender.send((index, result));
        });
    }
    drop(sender);

    let mut buffers = Vec::new();
    let mut failures = Vec::new();
    let mut outstanding = pending.len();

    while outstanding > 0 {
        if token.is_cancelled() {
            return Err(ScheduleError::Cancelled);
        }
        let received = match config.task_timeout {
            Some(timeout) => receiver.recv_timeout(timeout),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((index, Ok(batch))) => {
                pending[index] = None;
                outstanding -= 1;
                buffers.extend(batch);
            }
            Ok((index, Err(error))) => {
                let feature_ids = pending[index].take().unwrap_or_default();
                outstanding -= 1;
                let failure = PartitionFailure {
                    feature_ids,
                    error: TaskError::Buffer(error),
                };
                match config.failure_policy {
                    FailurePolicy::FailFast => {
                        shutdown.cancel();
                        return Err(ScheduleError::PartitionFailed(failure));
                    }
                    FailurePolicy::BestEffort => {
                        log::warn!("{failure}");
                        failures.push(failure);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // Ask stragglers to stand down, then attribute every
                // outstanding partition to the timeout.
                shutdown.cancel();
                let timeout = config.task_timeout.unwrap_or_default();
                let mut stalled: Vec<PartitionFailure> = pending
                    .iter_mut()
                    .filter_map(Option::take)
                    .map(|feature_ids| PartitionFailure {
                        feature_ids,
                        error: TaskError::TimedOut { timeout },
                    })
                    .collect();
                match config.failure_policy {
                    FailurePolicy::FailFast => {
                        let first = stalled.remove(0);
                        return Err(ScheduleError::PartitionFailed(first));
                    }
                    FailurePolicy::BestEffort => {
                        for failure in &stalled {
                            log::warn!("{failure}");
                        }
                        failures.append(&mut stalled);
                        outstanding = 0;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ScheduleError::ChannelClosed {
                    pending: outstanding,
                });
            }
        }
    }

    // Barrier reached: restore a canonical order before the merge phase.
    buffers.sort_unstable_by_key(|buffer| buffer.feature_id);
    Ok((buffers, failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferConfig, DistancePolicy, DistanceUnit};
    use crate::geometry::{GeoEngine, GeometryError, GeometryOpError};
    use geo::{CoordsIter, Geometry, MultiPolygon, Point};
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn point_feature(id: FeatureId) -> Feature {
        #[allow(clippy::cast_precision_loss, reason = "test ids are small")]
        let x = id as f64;
        Feature::with_empty_attributes(id, Geometry::Point(Point::new(x, 0.0)))
    }

    fn fixed_engine(distance: f64) -> Arc<BufferEngine<GeoEngine>> {
        Arc::new(
            BufferEngine::new(GeoEngine::default(), BufferConfig::fixed(distance))
                .expect("valid config"),
        )
    }

    #[rstest]
    #[case(10, 3, vec![3, 3, 3, 1])]
    #[case(4, 8, vec![4])]
    #[case(0, 5, vec![])]
    fn partitions_respect_the_cap(
        #[case] count: u64,
        #[case] cap: usize,
        #[case] expected_sizes: Vec<usize>,
    ) {
        let features: Vec<Feature> = (1..=count).map(point_feature).collect();
        let partitions = partition_features(features, cap);
        let sizes: Vec<usize> = partitions.iter().map(Vec::len).collect();
        assert_eq!(sizes, expected_sizes);
    }

    #[rstest]
    fn zero_workers_is_a_config_error() {
        let config = SchedulerConfig {
            workers: Some(0),
            ..SchedulerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidWorkerCount));
    }

    #[rstest]
    fn parallel_run_matches_a_sequential_pass() {
        let engine = fixed_engine(5.0);
        let features: Vec<Feature> = (1..=40).map(point_feature).collect();
        let sequential = engine.buffer_partition(&features).expect("sequential");

        let config = SchedulerConfig {
            workers: Some(4),
            partition_cap: 7,
            ..SchedulerConfig::default()
        };
        let (parallel, failures) =
            run_buffer_phase(&engine, features, &config, &CancellationToken::new())
                .expect("parallel run");

        assert!(failures.is_empty());
        assert_eq!(parallel, sequential);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(16)]
    fn result_is_independent_of_partition_size(#[case] cap: usize) {
        let engine = fixed_engine(2.5);
        let features: Vec<Feature> = (1..=25).map(point_feature).collect();
        let baseline = engine.buffer_partition(&features).expect("baseline");

        let config = SchedulerConfig {
            workers: Some(2),
            partition_cap: cap,
            ..SchedulerConfig::default()
        };
        let (buffers, _) =
            run_buffer_phase(&engine, features, &config, &CancellationToken::new())
                .expect("scheduled run");
        assert_eq!(buffers, baseline);
    }

    #[rstest]
    fn cancelled_token_stops_the_job_before_it_starts() {
        let engine = fixed_engine(1.0);
        let token = CancellationToken::new();
        token.cancel();
        let result = run_buffer_phase(
            &engine,
            vec![point_feature(1)],
            &SchedulerConfig::default(),
            &token,
        );
        assert!(matches!(result, Err(ScheduleError::Cancelled)));
    }

    fn unmappable_engine() -> Arc<BufferEngine<GeoEngine>> {
        // Features carry no "material" attribute, so every partition fails
        // distance resolution.
        let config = BufferConfig {
            policy: DistancePolicy::PerAttribute {
                field: "material".to_owned(),
                values: BTreeMap::from([("steel".to_owned(), 50.0)]),
                default: None,
            },
            unit: DistanceUnit::Meters,
        };
        Arc::new(BufferEngine::new(GeoEngine::default(), config).expect("valid config"))
    }

    #[rstest]
    fn fail_fast_surfaces_the_first_partition_failure() {
        let engine = unmappable_engine();
        let features: Vec<Feature> = (1..=6).map(point_feature).collect();
        let config = SchedulerConfig {
            workers: Some(2),
            partition_cap: 2,
            failure_policy: FailurePolicy::FailFast,
            ..SchedulerConfig::default()
        };
        let result = run_buffer_phase(&engine, features, &config, &CancellationToken::new());
        match result {
            Err(ScheduleError::PartitionFailed(failure)) => {
                assert_eq!(failure.feature_ids.len(), 2);
                assert!(matches!(failure.error, TaskError::Buffer(_)));
            }
            other => panic!("expected partition failure, got {other:?}"),
        }
    }

    #[rstest]
    fn best_effort_reports_failures_and_keeps_going() {
        let engine = unmappable_engine();
        let features: Vec<Feature> = (1..=6).map(point_feature).collect();
        let config = SchedulerConfig {
            workers: Some(2),
            partition_cap: 2,
            failure_policy: FailurePolicy::BestEffort,
            ..SchedulerConfig::default()
        };
        let (buffers, failures) =
            run_buffer_phase(&engine, features, &config, &CancellationToken::new())
                .expect("best effort completes");
        assert!(buffers.is_empty());
        assert_eq!(failures.len(), 3);
        let mut failed_ids: Vec<FeatureId> = failures
            .iter()
            .flat_map(|f| f.feature_ids.iter().copied())
            .collect();
        failed_ids.sort_unstable();
        assert_eq!(failed_ids, vec![1, 2, 3, 4, 5, 6]);
    }

    /// Sleeps before buffering any geometry east of `stall_beyond_x`.
    #[derive(Debug, Clone)]
    struct StallingEngine {
        inner: GeoEngine,
        stall_beyond_x: f64,
        delay: Duration,
    }

    impl GeometryEngine for StallingEngine {
        fn buffer(
            &self,
            geometry: &Geometry<f64>,
            distance: f64,
        ) -> Result<MultiPolygon<f64>, GeometryOpError> {
            if geometry.coords_iter().any(|c| c.x >= self.stall_beyond_x) {
                std::thread::sleep(self.delay);
            }
            self.inner.buffer(geometry, distance)
        }

        fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
            self.inner.union(a, b)
        }

        fn difference(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
            self.inner.difference(a, b)
        }

        fn intersects(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
            self.inner.intersects(a, b)
        }

        fn validate(&self, geometry: &Geometry<f64>) -> Result<(), GeometryError> {
            self.inner.validate(geometry)
        }
    }

    fn stalling_engine(delay: Duration) -> Arc<BufferEngine<StallingEngine>> {
        let engine = StallingEngine {
            inner: GeoEngine::default(),
            stall_beyond_x: 1000.0,
            delay,
        };
        Arc::new(BufferEngine::new(engine, BufferConfig::fixed(5.0)).expect("valid config"))
    }

    fn two_fast_one_stalled() -> Vec<Feature> {
        vec![
            point_feature(1),
            point_feature(2),
            Feature::with_empty_attributes(3, Geometry::Point(Point::new(5000.0, 0.0))),
        ]
    }

    #[rstest]
    fn timed_out_partition_fails_fast() {
        let engine = stalling_engine(Duration::from_secs(1));
        let config = SchedulerConfig {
            workers: Some(2),
            partition_cap: 1,
            failure_policy: FailurePolicy::FailFast,
            task_timeout: Some(Duration::from_millis(250)),
        };
        let result = run_buffer_phase(
            &engine,
            two_fast_one_stalled(),
            &config,
            &CancellationToken::new(),
        );
        match result {
            Err(ScheduleError::PartitionFailed(failure)) => {
                assert_eq!(failure.feature_ids, vec![3]);
                assert!(matches!(failure.error, TaskError::TimedOut { .. }));
            }
            other => panic!("expected a timed-out partition, got {other:?}"),
        }
    }

    #[rstest]
    fn best_effort_timeout_keeps_finished_buffers_and_the_callers_token() {
        let engine = stalling_engine(Duration::from_secs(1));
        let token = CancellationToken::new();
        let config = SchedulerConfig {
            workers: Some(2),
            partition_cap: 1,
            failure_policy: FailurePolicy::BestEffort,
            task_timeout: Some(Duration::from_millis(250)),
        };
        let (buffers, failures) = run_buffer_phase(&engine, two_fast_one_stalled(), &config, &token)
            .expect("best effort completes despite the stalled partition");

        let ids: Vec<FeatureId> = buffers.iter().map(|b| b.feature_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].feature_ids, vec![3]);
        assert!(matches!(
            failures[0].error,
            TaskError::TimedOut { timeout } if timeout == Duration::from_millis(250)
        ));
        assert!(!token.is_cancelled());
    }

    #[rstest]
    fn empty_input_yields_empty_output() {
        let engine = fixed_engine(1.0);
        let (buffers, failures) = run_buffer_phase(
            &engine,
            Vec::new(),
            &SchedulerConfig::default(),
            &CancellationToken::new(),
        )
        .expect("empty run");
        assert!(buffers.is_empty());
        assert!(failures.is_empty());
    }
}
