//! Behavioural coverage for the buffer → merge path.

use corridor_core::{
    partition_features, run_buffer_phase, BufferConfig, BufferEngine, CancellationToken, Feature,
    GeoEngine, MergeEngine, SchedulerConfig,
};
use geo::{Coord, Geometry, Line, Point};
use proptest::prelude::*;
use rstest::rstest;
use std::sync::Arc;

fn segment(id: u64, start: (f64, f64), end: (f64, f64)) -> Feature {
    Feature::with_empty_attributes(
        id,
        Geometry::Line(Line::new(
            Coord {
                x: start.0,
                y: start.1,
            },
            Coord { x: end.0, y: end.1 },
        )),
    )
}

#[rstest]
fn pairwise_overlapping_buffers_collapse_to_one_region() {
    // Three pipeline segments whose 50-unit buffers overlap pairwise.
    let features = vec![
        segment(1, (0.0, 0.0), (100.0, 0.0)),
        segment(2, (100.0, 60.0), (200.0, 60.0)),
        segment(3, (0.0, 60.0), (0.0, 160.0)),
    ];
    let engine = BufferEngine::new(GeoEngine::default(), BufferConfig::fixed(50.0))
        .expect("valid config");
    let buffers = engine.buffer_partition(&features).expect("buffer phase");

    let regions = MergeEngine::new(GeoEngine::default())
        .merge(&buffers)
        .expect("merge phase");

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].contributing_ids, vec![1, 2, 3]);
    assert!((regions[0].buffer_distance - 50.0).abs() < f64::EPSILON);
}

#[rstest]
fn distant_segments_stay_in_separate_regions() {
    let features = vec![
        segment(1, (0.0, 0.0), (100.0, 0.0)),
        segment(2, (5000.0, 5000.0), (5100.0, 5000.0)),
    ];
    let engine = BufferEngine::new(GeoEngine::default(), BufferConfig::fixed(50.0))
        .expect("valid config");
    let buffers = engine.buffer_partition(&features).expect("buffer phase");

    let regions = MergeEngine::new(GeoEngine::default())
        .merge(&buffers)
        .expect("merge phase");

    assert_eq!(regions.len(), 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The merged output never depends on how the features were partitioned.
    #[test]
    fn merged_regions_are_partition_independent(
        offsets in prop::collection::vec((0.0f64..1000.0, 0.0f64..1000.0), 1..16),
        cap in 1usize..8,
    ) {
        let features: Vec<Feature> = offsets
            .iter()
            .enumerate()
            .map(|(index, (x, y))| {
                Feature::with_empty_attributes(
                    index as u64 + 1,
                    Geometry::Point(Point::new(*x, *y)),
                )
            })
            .collect();

        let engine = Arc::new(
            BufferEngine::new(GeoEngine::default(), BufferConfig::fixed(40.0))
                .expect("valid config"),
        );
        let merge = MergeEngine::new(GeoEngine::default());

        let single = SchedulerConfig {
            workers: Some(1),
            partition_cap: features.len().max(1),
            ..SchedulerConfig::default()
        };
        let (baseline_buffers, _) =
            run_buffer_phase(&engine, features.clone(), &single, &CancellationToken::new())
                .expect("single-partition run");
        let baseline = merge.merge(&baseline_buffers).expect("baseline merge");

        let chunked = SchedulerConfig {
            workers: Some(4),
            partition_cap: cap,
            ..SchedulerConfig::default()
        };
        let (buffers, _) =
            run_buffer_phase(&engine, features, &chunked, &CancellationToken::new())
                .expect("chunked run");
        let regions = merge.merge(&buffers).expect("chunked merge");

        prop_assert_eq!(baseline, regions);
    }

    /// Partitions are disjoint, ordered, and cover the input.
    #[test]
    fn partitions_cover_the_input(count in 0u64..50, cap in 1usize..20) {
        let features: Vec<Feature> = (1..=count)
            .map(|id| Feature::with_empty_attributes(id, Geometry::Point(Point::new(0.0, 0.0))))
            .collect();
        let partitions = partition_features(features, cap);

        let flattened: Vec<u64> = partitions
            .iter()
            .flat_map(|p| p.iter().map(|f| f.id))
            .collect();
        let expected: Vec<u64> = (1..=count).collect();
        prop_assert_eq!(flattened, expected);
        prop_assert!(partitions.iter().all(|p| p.len() <= cap && !p.is_empty()));
    }
}
