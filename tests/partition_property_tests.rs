//! Property tests for input partitioning and metrics retention
//!
//! - Balance: partition sizes differ by at most one, larger ones first
//! - Coverage: every feature id lands in exactly one partition
//! - Layer routing: layers follow their polygon, orphans are dropped
//! - Retention: cleanup keeps exactly the most recently inserted jobs

mod common;

use common::data_feature_ids;
use forest_batch::metrics::MetricsCollector;
use forest_batch::partition::{balanced_sizes, InputPartitioner};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use tempfile::TempDir;

fn polygon_csv(ids: &[u32]) -> String {
    let mut csv = String::from("FEATURE_ID,MAP_ID\n");
    for id in ids {
        csv.push_str(&format!("{id},M{id}\n"));
    }
    csv
}

fn layer_csv(ids: &[u32], orphans: &[u32]) -> String {
    let mut csv = String::from("FEATURE_ID,LAYER_ID\n");
    for id in ids.iter().chain(orphans) {
        csv.push_str(&format!("{id},1\n"));
    }
    csv
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_balanced_sizes(count in 0usize..5000, partitions in 1usize..64) {
        let sizes = balanced_sizes(count, partitions);
        prop_assert_eq!(sizes.len(), partitions);
        prop_assert_eq!(sizes.iter().sum::<usize>(), count);

        let remainder = count % partitions;
        for (i, size) in sizes.iter().enumerate() {
            let expected = count / partitions + usize::from(i < remainder);
            prop_assert_eq!(*size, expected);
        }
    }

    #[test]
    fn prop_partitions_are_disjoint_and_complete(
        ids in prop::collection::btree_set(1u32..100_000, 1..120),
        orphans in prop::collection::btree_set(100_000u32..200_000, 0..10),
        partitions in 1usize..9,
    ) {
        let ids: Vec<u32> = ids.into_iter().collect();
        let orphans: Vec<u32> = orphans.into_iter().collect();
        let temp = TempDir::new().unwrap();

        let summary = InputPartitioner::new()
            .partition_with_summary(
                polygon_csv(&ids).as_bytes(),
                layer_csv(&ids, &orphans).as_bytes(),
                partitions,
                temp.path(),
                "prop-job",
            )
            .unwrap();

        prop_assert_eq!(summary.total_feature_ids, ids.len());
        prop_assert_eq!(summary.feature_ids_per_partition.iter().sum::<usize>(), ids.len());
        prop_assert_eq!(summary.layer_rows_dropped, orphans.len());

        let mut seen = HashSet::new();
        for (index, expected) in summary.feature_ids_per_partition.iter().enumerate() {
            let dir = temp.path().join(format!("input-partition{index}"));
            let polygon_ids = data_feature_ids(&dir.join("polygons.csv")).unwrap();
            prop_assert_eq!(polygon_ids.len(), *expected);

            let layer_ids: BTreeSet<String> =
                data_feature_ids(&dir.join("layers.csv")).unwrap().into_iter().collect();
            let own_ids: BTreeSet<String> = polygon_ids.iter().cloned().collect();
            prop_assert_eq!(&layer_ids, &own_ids);

            for id in polygon_ids {
                prop_assert!(seen.insert(id), "feature id in more than one partition");
            }
        }
        prop_assert_eq!(seen.len(), ids.len());
    }

    #[test]
    fn prop_cleanup_keeps_most_recent_jobs(job_count in 1usize..40, keep in 0usize..45) {
        let collector = MetricsCollector::new();
        let guids: Vec<String> = (0..job_count).map(|i| format!("job-{i}")).collect();
        for (i, guid) in guids.iter().enumerate() {
            collector.initialize_metrics(guid, i as u64).unwrap();
        }

        let removed = collector.cleanup_old_metrics(keep as i64).unwrap();
        let kept = keep.min(job_count);
        prop_assert_eq!(removed, job_count - kept);
        prop_assert_eq!(collector.len(), kept);
        for (i, guid) in guids.iter().enumerate() {
            prop_assert_eq!(collector.job_metrics(guid).is_some(), i >= job_count - kept);
        }
    }
}
