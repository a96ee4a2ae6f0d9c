//! End-to-end tests for the job lifecycle
//!
//! Runs whole jobs against on-disk inventories and checks the archive,
//! the partition directories and the collected metrics.

mod common;

use async_trait::async_trait;
use common::{zip_entry_names, zip_entry_text, InventoryBuilder, TestContext};
use forest_batch::config::BatchConfig;
use forest_batch::error::{BatchError, BatchResult, ErrorCode};
use forest_batch::job::BatchJobRunner;
use forest_batch::model::{ExitStatus, JobParameters};
use forest_batch::pipeline::{EchoProjection, ProjectionRequest, ProjectionService, ECHO_YIELD_HEADER};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ALL_LOGS: &str = r#"{"outputFormat":"CSV_YIELD_TABLE","selectedExecutionOptions":["DoEnableProgressLogging","DoEnableErrorLogging"]}"#;

fn test_config() -> BatchConfig {
    let mut config = BatchConfig::default();
    config.retry.backoff_period = Duration::ZERO;
    config.partitioning.chunk_size = 4;
    config
}

fn job_params(ctx: &TestContext, guid: &str, partitions: i64) -> JobParameters {
    JobParameters::new(guid, ctx.path().join(guid))
        .with_partition_count(partitions)
        .with_projection_parameters(ALL_LOGS)
}

/// Fails every chunk that contains one of the given feature ids
struct RejectingProjection {
    rejected: HashSet<String>,
    inner: EchoProjection,
}

impl RejectingProjection {
    fn new(ids: &[&str]) -> Self {
        Self {
            rejected: ids.iter().map(|s| s.to_string()).collect(),
            inner: EchoProjection::new(),
        }
    }
}

#[async_trait]
impl ProjectionService for RejectingProjection {
    async fn project(&self, request: ProjectionRequest<'_>) -> BatchResult<String> {
        if let Some(bad) = request
            .records
            .iter()
            .find(|r| self.rejected.contains(&r.feature_id))
        {
            return Err(BatchError::fatal_projection(
                request.partition_name,
                format!("Polygon {} cannot be projected", bad.feature_id),
            ));
        }
        self.inner.project(request).await
    }
}

/// Fails the first `failures` calls with a retryable error
struct FlakyProjection {
    remaining: AtomicU32,
    inner: EchoProjection,
}

#[async_trait]
impl ProjectionService for FlakyProjection {
    async fn project(&self, request: ProjectionRequest<'_>) -> BatchResult<String> {
        let left = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if left.is_ok() {
            return Err(BatchError::retryable_projection(
                request.partition_name,
                "Projection engine busy",
            ));
        }
        self.inner.project(request).await
    }
}

#[tokio::test]
async fn test_job_merges_all_partitions_into_one_archive() {
    let ctx = TestContext::new().unwrap();
    let inventory = InventoryBuilder::new().polygons(1001, 10, 2).orphan_layer(9999);
    let (polygons, layers) = inventory.write_to(&ctx.path().join("in")).unwrap();

    let runner = BatchJobRunner::new(test_config(), Arc::new(EchoProjection::new()));
    let report = runner
        .run(11, &job_params(&ctx, "job-a", 3), polygons, layers)
        .await
        .unwrap();

    assert_eq!(report.exit_status, ExitStatus::Completed);
    assert_eq!(report.partition_summary.feature_ids_per_partition, vec![4, 3, 3]);
    assert_eq!(report.partition_summary.layer_rows_dropped, 1);
    assert_eq!(report.totals.read, 10);
    assert_eq!(report.totals.written, 10);
    assert_eq!(report.totals.skipped, 0);

    let entries = zip_entry_names(&report.archive_path).unwrap();
    assert!(entries.contains(&"YieldTable.csv".to_string()));
    assert!(entries.contains(&"ProgressLog.txt".to_string()));

    let table = zip_entry_text(&report.archive_path, "YieldTable.csv").unwrap();
    let mut lines = table.lines();
    assert_eq!(lines.next(), Some(ECHO_YIELD_HEADER));
    let table_numbers: Vec<u32> = lines
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(table_numbers.len(), 20);
    let distinct: HashSet<_> = table_numbers.iter().collect();
    assert_eq!(distinct.len(), 20);
    assert_eq!(table_numbers.iter().max(), Some(&20));

    assert!(!report.job_base_dir.join("input-partition0").exists());
    assert!(!report.job_base_dir.join("output-partition2").exists());
    assert_eq!(report.directories_removed, 6);
}

#[tokio::test]
async fn test_polygon_without_layers_is_reported_in_error_log() {
    let ctx = TestContext::new().unwrap();
    let inventory = InventoryBuilder::new().polygon(1, 1).polygon(2, 0).polygon(3, 1);
    let (polygons, layers) = inventory.write_to(&ctx.path().join("in")).unwrap();

    let runner = BatchJobRunner::new(test_config(), Arc::new(EchoProjection::new()));
    let report = runner
        .run(12, &job_params(&ctx, "job-b", 1), polygons, layers)
        .await
        .unwrap();

    assert!(report.is_success());
    let errors = zip_entry_text(&report.archive_path, "ErrorLog.txt").unwrap();
    assert!(errors.contains("polygon 2 has no layers"));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let ctx = TestContext::new().unwrap();
    let (polygons, layers) = InventoryBuilder::new()
        .polygons(1, 4, 1)
        .write_to(&ctx.path().join("in"))
        .unwrap();

    let projection = FlakyProjection {
        remaining: AtomicU32::new(2),
        inner: EchoProjection::new(),
    };
    let runner = BatchJobRunner::new(test_config(), Arc::new(projection));
    let report = runner
        .run(13, &job_params(&ctx, "job-c", 1), polygons, layers)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.totals.written, 4);

    let metrics = runner.metrics().job_metrics("job-c").unwrap();
    assert_eq!(metrics.total_retry_attempts, 3);
    assert_eq!(metrics.successful_retries, 1);
    assert_eq!(metrics.total_skips, 0);
}

#[tokio::test]
async fn test_failing_record_is_skipped_and_attributed() {
    let ctx = TestContext::new().unwrap();
    let (polygons, layers) = InventoryBuilder::new()
        .polygons(1, 6, 1)
        .write_to(&ctx.path().join("in"))
        .unwrap();

    let runner = BatchJobRunner::new(test_config(), Arc::new(RejectingProjection::new(&["3"])));
    let report = runner
        .run(14, &job_params(&ctx, "job-d", 1), polygons, layers)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.totals.read, 6);
    assert_eq!(report.totals.written, 5);
    assert_eq!(report.totals.skipped, 1);

    let table = zip_entry_text(&report.archive_path, "YieldTable.csv").unwrap();
    assert!(!table.lines().any(|l| l.split(',').nth(1) == Some("3")));

    let metrics = runner.metrics().job_metrics("job-d").unwrap();
    assert_eq!(metrics.total_skips, 1);
    assert_eq!(metrics.skip_details[0].feature_id.as_deref(), Some("3"));
    assert_eq!(metrics.total_chunk_failures, 2);
}

#[tokio::test]
async fn test_skip_limit_fails_only_that_partition() {
    let ctx = TestContext::new().unwrap();
    let (polygons, layers) = InventoryBuilder::new()
        .polygons(1, 8, 1)
        .write_to(&ctx.path().join("in"))
        .unwrap();

    let mut params = job_params(&ctx, "job-e", 2);
    params.max_skip_count = Some(1);

    let runner = BatchJobRunner::new(
        test_config(),
        Arc::new(RejectingProjection::new(&["1", "2"])),
    );
    let report = runner.run(15, &params, polygons, layers).await.unwrap();

    assert_eq!(report.exit_status, ExitStatus::Failed);
    assert_eq!(report.totals.failed, 1);
    assert!(report.partitions[1].is_success());

    let (partition, error) = report.partition_errors().next().unwrap();
    assert_eq!(partition, "partition0");
    assert_eq!(error.code(), ErrorCode::SKIP_LIMIT_EXCEEDED);

    let metrics = runner.metrics().job_metrics("job-e").unwrap();
    assert_eq!(metrics.status, ExitStatus::Failed);
    assert_eq!(
        metrics.partition_metrics["partition0"].exit_code,
        Some(ExitStatus::Failed)
    );
    assert_eq!(
        metrics.partition_metrics["partition1"].exit_code,
        Some(ExitStatus::Completed)
    );
}

#[tokio::test]
async fn test_headerless_inputs_are_tolerated() {
    let ctx = TestContext::new().unwrap();
    let (polygons, layers) = InventoryBuilder::new()
        .polygons(50, 3, 1)
        .without_headers()
        .write_to(&ctx.path().join("in"))
        .unwrap();

    let runner = BatchJobRunner::new(test_config(), Arc::new(EchoProjection::new()));
    let report = runner
        .run(16, &job_params(&ctx, "job-f", 2), polygons, layers)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.totals.written, 3);
}
