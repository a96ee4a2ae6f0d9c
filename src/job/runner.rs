//! End-to-end job lifecycle

use crate::aggregation::ResultAggregationService;
use crate::config::BatchConfig;
use crate::dispatch::{DispatchTotals, PartitionHandler, PartitionOutcome};
use crate::error::{BatchError, BatchResult, ErrorCode, ErrorExt};
use crate::metrics::MetricsCollector;
use crate::model::naming::job_timestamp;
use crate::model::{ExitStatus, Job, JobParameters, StepExecution};
use crate::partition::{CsvSource, InputPartitioner, PartitionSummary};
use crate::pipeline::{ChunkStep, ProjectionService};
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Final state of one job run
#[derive(Debug)]
pub struct JobReport {
    pub job_guid: String,
    pub job_execution_id: u64,
    pub job_base_dir: PathBuf,
    pub exit_status: ExitStatus,
    pub partition_summary: PartitionSummary,
    pub partitions: Vec<PartitionOutcome>,
    pub totals: DispatchTotals,
    pub archive_path: PathBuf,
    pub archive_valid: bool,
    /// Partition directories removed after a valid archive was produced
    pub directories_removed: usize,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.exit_status == ExitStatus::Completed
    }

    /// Errors of the partitions that failed, by partition index
    pub fn partition_errors(&self) -> impl Iterator<Item = (&str, &BatchError)> {
        self.partitions
            .iter()
            .filter_map(|o| o.error.as_ref().map(|e| (o.partition.name.as_str(), e)))
    }
}

/// Runs a job through partitioning, dispatch, aggregation and cleanup
pub struct BatchJobRunner {
    config: BatchConfig,
    metrics: Arc<MetricsCollector>,
    projection: Arc<dyn ProjectionService>,
    partitioner: InputPartitioner,
    aggregation: ResultAggregationService,
    interrupt: Option<Arc<Notify>>,
}

impl BatchJobRunner {
    pub fn new(config: BatchConfig, projection: Arc<dyn ProjectionService>) -> Self {
        let metrics = Arc::new(MetricsCollector::with_max_detail_entries(
            config.metrics.max_detail_entries,
        ));
        Self {
            aggregation: ResultAggregationService::from_config(&config.aggregation),
            config,
            metrics,
            projection,
            partitioner: InputPartitioner::new(),
            interrupt: None,
        }
    }

    /// Share an existing collector, e.g. across several runs
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Cut retry backoff sleeps short through `notify`
    pub fn with_interrupt(mut self, notify: Arc<Notify>) -> Self {
        self.interrupt = Some(notify);
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Execute one job over the given polygon and layer inputs
    ///
    /// Partition failures do not abort the job; they are reported in the
    /// returned `JobReport` and make its status `FAILED`. Errors before
    /// dispatch (bad parameters, unpartitionable input) and aggregation
    /// errors are returned as `Err` after the job metrics are finalized.
    /// File-bound phases run on the blocking pool, hence the owned sources.
    pub async fn run<P, L>(
        &self,
        job_execution_id: u64,
        params: &JobParameters,
        polygons: P,
        layers: L,
    ) -> BatchResult<JobReport>
    where
        P: CsvSource + 'static,
        L: CsvSource + 'static,
    {
        validate_parameters(params)?;
        let job = Job::new(job_execution_id, params);
        self.metrics
            .initialize_metrics(&job.guid, job.execution_id)?;

        info!(
            "[GUID: {}, EXEID: {}] Starting job in {}",
            job.guid,
            job.execution_id,
            job.base_dir.display()
        );

        match self.run_job(&job, params, polygons, layers).await {
            Ok(report) => {
                self.finish(&job, report.exit_status, report.totals.read, report.totals.written);
                Ok(report)
            }
            Err(e) => {
                error!(
                    "[GUID: {}, EXEID: {}] Job failed: {}",
                    job.guid, job.execution_id, e
                );
                self.finish(&job, ExitStatus::Failed, 0, 0);
                Err(e.with_job(&job.guid, job.execution_id))
            }
        }
    }

    async fn run_job<P, L>(
        &self,
        job: &Job,
        params: &JobParameters,
        polygons: P,
        layers: L,
    ) -> BatchResult<JobReport>
    where
        P: CsvSource + 'static,
        L: CsvSource + 'static,
    {
        let grid_size = self.config.grid_size_for(params);
        let partition_count = usize::try_from(grid_size).map_err(|_| {
            BatchError::partitioning(
                ErrorCode::PARTITION_INVALID_COUNT,
                &job.guid,
                format!("Partition count must be positive, got: {}", grid_size),
                None,
            )
        })?;

        tokio::fs::create_dir_all(&job.base_dir)
            .await
            .to_storage_error(&job.base_dir, "Failed to create job base directory")?;

        let partitioner = self.partitioner.clone();
        let (base_dir, guid) = (job.base_dir.clone(), job.guid.clone());
        let partition_summary = run_blocking(&job.guid, "Partitioning", move || {
            partitioner.partition_with_summary(&polygons, &layers, partition_count, &base_dir, &guid)
        })
        .await?;

        let partitions = self.dispatch(job, params, grid_size).await?;
        let totals = DispatchTotals::from_outcomes(&partitions);

        let aggregation = self.aggregation.clone();
        let finished = job.clone();
        let (archive_path, archive_valid, directories_removed) =
            run_blocking(&job.guid, "Aggregation", move || {
                let archive_path = aggregation.aggregate(
                    finished.execution_id,
                    &finished.guid,
                    &finished.base_dir,
                    &job_timestamp(),
                )?;
                let archive_valid = aggregation.validate_consolidated_zip(&archive_path);
                let removed = if archive_valid {
                    aggregation.cleanup_partition_directories(&finished.base_dir)
                } else {
                    warn!(
                        "[GUID: {}, EXEID: {}] Archive {} failed validation, keeping partition directories",
                        finished.guid,
                        finished.execution_id,
                        archive_path.display()
                    );
                    0
                };
                Ok((archive_path, archive_valid, removed))
            })
            .await?;

        let exit_status = if totals.failed == 0 && archive_valid {
            ExitStatus::Completed
        } else {
            ExitStatus::Failed
        };

        info!(
            "[GUID: {}, EXEID: {}] Job finished with {}: {} partitions ({} failed), read={}, written={}, skipped={}",
            job.guid,
            job.execution_id,
            exit_status,
            totals.partitions,
            totals.failed,
            totals.read,
            totals.written,
            totals.skipped
        );

        Ok(JobReport {
            job_guid: job.guid.clone(),
            job_execution_id: job.execution_id,
            job_base_dir: job.base_dir.clone(),
            exit_status,
            partition_summary,
            partitions,
            totals,
            archive_path,
            archive_valid,
            directories_removed,
        })
    }

    async fn dispatch(
        &self,
        job: &Job,
        params: &JobParameters,
        grid_size: i64,
    ) -> BatchResult<Vec<PartitionOutcome>> {
        let settings = self.config.step_settings(params);
        let worker_job = job.clone();
        let parameters_json = params.projection_parameters_json.clone();
        let projection = Arc::clone(&self.projection);
        let metrics = Arc::clone(&self.metrics);
        let interrupt = self.interrupt.clone();

        let mut handler = PartitionHandler::new(grid_size, self.config.thread_pool.max_workers())
            .with_thread_name_prefix(self.config.thread_pool.thread_name_prefix.clone());

        handler
            .handle(&job.base_dir, move |context| {
                let step = StepExecution::new(&worker_job, context, parameters_json.clone());
                let mut chunk_step = ChunkStep::new(
                    &step,
                    &settings,
                    Arc::clone(&projection),
                    Some(Arc::clone(&metrics)),
                );
                if let Some(notify) = &interrupt {
                    chunk_step = chunk_step.with_interrupt(Arc::clone(notify));
                }
                chunk_step.execute(step).boxed()
            })
            .await
    }

    fn finish(&self, job: &Job, status: ExitStatus, read: u64, written: u64) {
        if let Err(e) = self
            .metrics
            .finalize_job_metrics(&job.guid, status, read, written)
        {
            warn!(
                "[GUID: {}, EXEID: {}] Failed to finalize job metrics: {}",
                job.guid, job.execution_id, e
            );
        }
        match self.metrics.cleanup_old_metrics(self.config.metrics.keep_count) {
            Ok(0) => {}
            Ok(removed) => info!("Evicted metrics of {} older jobs", removed),
            Err(e) => warn!("Failed to clean up old job metrics: {}", e),
        }
    }
}

/// Run file-bound job work on the blocking pool
async fn run_blocking<T, F>(job_guid: &str, phase: &str, op: F) -> BatchResult<T>
where
    F: FnOnce() -> BatchResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op).await.map_err(|e| {
        BatchError::worker_failed(
            ErrorCode::WORKER_PANICKED,
            job_guid,
            format!("{} task failed: {}", phase, e),
        )
        .with_source(e)
    })?
}

fn validate_parameters(params: &JobParameters) -> BatchResult<()> {
    if params.job_guid.trim().is_empty() {
        return Err(BatchError::config_with_code(
            ErrorCode::CONFIG_MISSING_PARAMETER,
            "Job guid must be provided",
        ));
    }
    if params.job_base_dir.as_os_str().is_empty() {
        return Err(BatchError::config_with_code(
            ErrorCode::CONFIG_MISSING_PARAMETER,
            format!("Job base directory must be provided for job {}", params.job_guid),
        ));
    }
    if params.job_base_dir.is_file() {
        return Err(BatchError::config_with_code(
            ErrorCode::CONFIG_INVALID_PATH,
            format!(
                "Job base directory {} is not a directory",
                params.job_base_dir.display()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EchoProjection;
    use std::time::Duration;
    use tempfile::TempDir;

    const POLYGONS: &str = "FEATURE_ID,MAP_ID,POLYGON_NUMBER\n101,MAP1,1\n102,MAP1,2\n103,MAP2,3\n";
    const LAYERS: &str =
        "FEATURE_ID,LAYER_ID,LAYER_LEVEL\n101,1,P\n102,1,P\n103,1,P\n103,2,S\n999,1,P\n";

    fn config() -> BatchConfig {
        let mut config = BatchConfig::default();
        config.retry.backoff_period = Duration::ZERO;
        config
    }

    fn params(base: &std::path::Path) -> JobParameters {
        JobParameters::new("job-1", base.join("job-1"))
            .with_partition_count(2)
            .with_projection_parameters(r#"{"outputFormat":"CSV_YIELD_TABLE"}"#)
    }

    #[tokio::test]
    async fn test_successful_job_produces_valid_archive() {
        let temp = TempDir::new().unwrap();
        let runner = BatchJobRunner::new(config(), Arc::new(EchoProjection::new()));

        let report = runner
            .run(1, &params(temp.path()), POLYGONS.as_bytes(), LAYERS.as_bytes())
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(report.archive_valid);
        assert_eq!(report.partition_summary.total_feature_ids, 3);
        assert_eq!(report.totals.read, 3);
        assert_eq!(report.totals.written, 3);
        assert_eq!(report.directories_removed, 4);
        assert!(report.archive_path.exists());

        let metrics = runner.metrics().job_metrics("job-1").unwrap();
        assert_eq!(metrics.status, ExitStatus::Completed);
        assert_eq!(metrics.partition_metrics.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_projection_parameters_fail_every_partition() {
        let temp = TempDir::new().unwrap();
        let runner = BatchJobRunner::new(config(), Arc::new(EchoProjection::new()));
        let mut params = params(temp.path());
        params.projection_parameters_json = None;

        let report = runner
            .run(2, &params, POLYGONS.as_bytes(), LAYERS.as_bytes())
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.totals.failed, 2);
        assert_eq!(report.partition_errors().count(), 2);
        assert!(!report.archive_valid);
        assert_eq!(report.directories_removed, 0);
        assert!(report.job_base_dir.join("input-partition0").exists());
    }

    #[tokio::test]
    async fn test_unpartitionable_input_finalizes_as_failed() {
        let temp = TempDir::new().unwrap();
        let runner = BatchJobRunner::new(config(), Arc::new(EchoProjection::new()));

        let err = runner
            .run(3, &params(temp.path()), b"FEATURE_ID\n".as_slice(), LAYERS.as_bytes())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::PARTITION_NO_FEATURE_IDS);
        let metrics = runner.metrics().job_metrics("job-1").unwrap();
        assert_eq!(metrics.status, ExitStatus::Failed);
    }

    #[tokio::test]
    async fn test_non_positive_partition_count_uses_configured_grid() {
        let temp = TempDir::new().unwrap();
        let mut config = config();
        config.partitioning.grid_size = 3;
        let runner = BatchJobRunner::new(config, Arc::new(EchoProjection::new()));

        for (exe, requested) in [(5, 0), (6, -4)] {
            let guid = format!("grid-{exe}");
            let params = JobParameters::new(&guid, temp.path().join(&guid))
                .with_partition_count(requested)
                .with_projection_parameters("{}");
            let report = runner
                .run(exe, &params, POLYGONS.as_bytes(), LAYERS.as_bytes())
                .await
                .unwrap();

            assert!(report.is_success());
            assert_eq!(report.partitions.len(), 3);
            assert_eq!(report.partition_summary.feature_ids_per_partition, vec![1, 1, 1]);
            assert_eq!(report.totals.written, 3);
        }
    }

    #[tokio::test]
    async fn test_blank_guid_is_rejected() {
        let temp = TempDir::new().unwrap();
        let runner = BatchJobRunner::new(config(), Arc::new(EchoProjection::new()));
        let params = JobParameters::new(" ", temp.path());

        let err = runner
            .run(4, &params, POLYGONS.as_bytes(), LAYERS.as_bytes())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_MISSING_PARAMETER);
        assert!(runner.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_old_job_metrics_are_evicted() {
        let temp = TempDir::new().unwrap();
        let mut config = config();
        config.metrics.keep_count = 1;
        let runner = BatchJobRunner::new(config, Arc::new(EchoProjection::new()));

        for (exe, guid) in [(1, "a"), (2, "b")] {
            let params = JobParameters::new(guid, temp.path().join(guid))
                .with_partition_count(1)
                .with_projection_parameters("{}");
            runner
                .run(exe, &params, POLYGONS.as_bytes(), LAYERS.as_bytes())
                .await
                .unwrap();
        }

        assert_eq!(runner.metrics().len(), 1);
        assert!(runner.metrics().job_metrics("b").is_some());
    }
}
