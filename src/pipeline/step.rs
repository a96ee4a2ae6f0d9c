//! Worker step: the read, process, write loop for one partition

use super::processor::RecordProcessor;
use super::projection::ProjectionService;
use super::reader::PartitionReader;
use super::writer::ProjectionWriter;
use crate::config::StepSettings;
use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::metrics::MetricsCollector;
use crate::model::{BatchRecord, ChunkMetadata, ExitStatus, StepExecution};
use crate::policy::{RetryContext, RetryPolicy, SkipPolicy};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Terminal state of one partition's step
#[derive(Debug)]
pub struct StepOutcome {
    /// Final counters and exit status
    pub step: StepExecution,
    pub error: Option<BatchError>,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct ChunkStep {
    partition_name: String,
    /// Moved onto the blocking pool for each file operation
    reader: Option<PartitionReader>,
    processor: RecordProcessor,
    writer: ProjectionWriter,
    retry: RetryPolicy,
    skip: SkipPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ChunkStep {
    pub fn new(
        step: &StepExecution,
        settings: &StepSettings,
        service: Arc<dyn ProjectionService>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let mut retry = RetryPolicy::new(settings.max_retry_attempts, settings.retry_backoff);
        let mut skip = SkipPolicy::new(settings.max_skip_count);
        if let Some(m) = &metrics {
            retry = retry.with_metrics(Arc::clone(m));
            skip = skip.with_metrics(Arc::clone(m));
        }

        Self {
            partition_name: step.partition_name().to_string(),
            reader: Some(PartitionReader::new(
                step.partition_name(),
                &step.job_guid,
                step.job_execution_id,
                settings.chunk_size,
            )),
            processor: RecordProcessor::new(metrics.clone()),
            writer: ProjectionWriter::new(service, metrics.clone()),
            retry,
            skip,
            metrics,
        }
    }

    /// Wake retry backoff sleeps early through `notify`
    pub fn with_interrupt(mut self, notify: Arc<Notify>) -> Self {
        self.retry = self.retry.with_interrupt(notify);
        self
    }

    /// Run the step to completion
    ///
    /// Never panics on step failure: the error is returned in the outcome
    /// alongside the counters reached so far.
    pub async fn execute(mut self, mut step: StepExecution) -> StepOutcome {
        step.exit_status = ExitStatus::Executing;
        info!(
            "[GUID: {}, EXEID: {}, Partition: {}] Starting partition step",
            step.job_guid,
            step.job_execution_id,
            step.partition_name()
        );

        self.retry.before_step(&step);
        self.skip.before_step(&step);

        let result = self.run(&mut step).await;
        if let Some(reader) = self.reader.as_mut() {
            reader.close();
        }

        let status = match &result {
            Ok(()) => ExitStatus::Completed,
            Err(_) => ExitStatus::Failed,
        };
        step.exit_status = status;

        if let Some(metrics) = &self.metrics {
            if let Err(e) = metrics.complete_partition_metrics(
                &step.job_guid,
                step.partition_name(),
                step.write_count,
                status,
            ) {
                warn!(
                    "[GUID: {}, EXEID: {}, Partition: {}] Failed to complete partition metrics: {}",
                    step.job_guid,
                    step.job_execution_id,
                    step.partition_name(),
                    e
                );
            }
        }

        match &result {
            Ok(()) => info!(
                "[GUID: {}, EXEID: {}, Partition: {}] Partition step completed: read={}, written={}, skipped={}",
                step.job_guid,
                step.job_execution_id,
                step.partition_name(),
                step.read_count,
                step.write_count,
                step.skip_count
            ),
            Err(e) => error!(
                "[GUID: {}, EXEID: {}, Partition: {}] Partition step failed after read={}, written={}, skipped={}: {}",
                step.job_guid,
                step.job_execution_id,
                step.partition_name(),
                step.read_count,
                step.write_count,
                step.skip_count,
                e
            ),
        }

        StepOutcome {
            step,
            error: result.err(),
        }
    }

    async fn run(&mut self, step: &mut StepExecution) -> BatchResult<()> {
        self.processor.before_step(step)?;
        self.writer.before_step(step)?;
        let job_base_dir = step.job_base_dir.clone();
        self.with_reader(move |reader| reader.open(&job_base_dir))
            .await??;

        loop {
            let loaded = match self.with_reader(PartitionReader::read).await? {
                Ok(Some(loaded)) => loaded,
                Ok(None) => break,
                Err(e) => {
                    self.skip_or_fail(e, step)?;
                    continue;
                }
            };
            let chunk = loaded.chunk;
            step.read_count += (loaded.records.len() + loaded.malformed.len()) as u64;

            for malformed in loaded.malformed {
                self.skip_or_fail(malformed, step)?;
            }

            let mut records = Vec::with_capacity(loaded.records.len());
            for record in loaded.records {
                match self.processor.process(record) {
                    Ok(record) => records.push(record),
                    Err(e) => self.skip_or_fail(e, step)?,
                }
            }

            self.write_chunk(&records, &chunk, step).await?;
        }
        Ok(())
    }

    /// Run a reader operation on the blocking pool
    ///
    /// The outer error is a worker failure; the reader is lost with it.
    async fn with_reader<T, F>(&mut self, op: F) -> BatchResult<T>
    where
        F: FnOnce(&mut PartitionReader) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| BatchError::reader_not_opened(&self.partition_name))?;
        let (reader, value) = tokio::task::spawn_blocking(move || {
            let value = op(&mut reader);
            (reader, value)
        })
        .await
        .map_err(|e| {
            BatchError::worker_failed(
                ErrorCode::WORKER_PANICKED,
                &self.partition_name,
                format!("Reader task failed: {}", e),
            )
            .with_source(e)
        })?;
        self.reader = Some(reader);
        Ok(value)
    }

    /// Write a chunk; on failure fall back to one record at a time
    async fn write_chunk(
        &mut self,
        records: &[BatchRecord],
        chunk: &ChunkMetadata,
        step: &mut StepExecution,
    ) -> BatchResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let err = match self.write_with_retry(records, chunk, step).await {
            Ok(()) => {
                step.write_count += records.len() as u64;
                return Ok(());
            }
            Err(e) => e,
        };

        if !err.is_skippable() {
            return Err(err);
        }
        if records.len() == 1 {
            return self.skip_or_fail(err, step);
        }

        debug!(
            "[GUID: {}, EXEID: {}, Partition: {}] Chunk {}..{} failed, scanning record by record: {}",
            step.job_guid,
            step.job_execution_id,
            step.partition_name(),
            chunk.start_index,
            chunk.end_index(),
            err
        );

        for (offset, record) in records.iter().enumerate() {
            let single = ChunkMetadata {
                start_index: chunk.start_index + offset,
                record_count: 1,
                ..chunk.clone()
            };
            match self
                .write_with_retry(std::slice::from_ref(record), &single, step)
                .await
            {
                Ok(()) => step.write_count += 1,
                Err(e) => self.skip_or_fail(e.with_feature_id(&record.feature_id), step)?,
            }
        }
        Ok(())
    }

    async fn write_with_retry(
        &self,
        records: &[BatchRecord],
        chunk: &ChunkMetadata,
        step: &StepExecution,
    ) -> BatchResult<()> {
        let mut retries = 0u32;
        let mut last_error: Option<BatchError> = None;

        loop {
            match self.writer.write(records, chunk).await {
                Ok(_) => {
                    if let Some(e) = &last_error {
                        self.retry.on_retry_success(retries, e, Some(step));
                    }
                    return Ok(());
                }
                Err(e) => {
                    let mut ctx = RetryContext::new(retries, &e).with_step(step);
                    let granted = self.retry.can_retry(&mut ctx).await;
                    if ctx.interrupted {
                        warn!(
                            "[GUID: {}, EXEID: {}, Partition: {}] Retry backoff was interrupted",
                            step.job_guid,
                            step.job_execution_id,
                            step.partition_name()
                        );
                    }
                    if !granted {
                        return Err(e);
                    }
                    retries += 1;
                    last_error = Some(e);
                }
            }
        }
    }

    /// Spend one unit of skip budget on `err`, or fail the step with it
    fn skip_or_fail(&self, err: BatchError, step: &mut StepExecution) -> BatchResult<()> {
        if self.skip.should_skip(&err, step.skip_count, Some(&*step))? {
            step.skip_count += 1;
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::model::naming::{LAYER_FILE_NAME, POLYGON_FILE_NAME};
    use crate::model::{Job, JobParameters, PartitionContext};
    use crate::pipeline::projection::{EchoProjection, ProjectionRequest};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings(chunk_size: usize, max_skip_count: u64) -> StepSettings {
        StepSettings {
            chunk_size,
            max_retry_attempts: 2,
            retry_backoff: Duration::ZERO,
            max_skip_count,
        }
    }

    fn write_input(base: &Path, polygons: &[&str]) {
        let dir = base.join("input-partition0");
        fs::create_dir_all(&dir).unwrap();
        let mut polygon_text = String::from("FEATURE_ID,MAP_ID,POLYGON_NUMBER\n");
        let mut layer_text = String::from("FEATURE_ID,LAYER_ID,LAYER_LEVEL_CODE\n");
        for id in polygons {
            polygon_text.push_str(&format!("{id},093C090,1\n"));
            layer_text.push_str(&format!("{id},1,P\n"));
        }
        fs::write(dir.join(POLYGON_FILE_NAME), polygon_text).unwrap();
        fs::write(dir.join(LAYER_FILE_NAME), layer_text).unwrap();
    }

    fn new_step(base: &Path, metrics: &MetricsCollector) -> StepExecution {
        let params = JobParameters::new("step-job", base).with_projection_parameters("{}");
        let job = Job::new(21, &params);
        metrics.initialize_metrics("step-job", 21).unwrap();
        StepExecution::new(
            &job,
            PartitionContext::new(0, Some(base.to_path_buf())),
            params.projection_parameters_json.clone(),
        )
    }

    /// Fails every chunk containing one of `bad`, fatally
    struct RejectingProjection {
        bad: HashSet<String>,
    }

    #[async_trait]
    impl ProjectionService for RejectingProjection {
        async fn project(&self, request: ProjectionRequest<'_>) -> BatchResult<String> {
            if request.records.iter().any(|r| self.bad.contains(&r.feature_id)) {
                return Err(BatchError::fatal_projection(request.partition_name, "bad polygon"));
            }
            EchoProjection::new().project(request).await
        }
    }

    /// Fails the first `failures` calls with a retryable error
    struct FlakyProjection {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProjectionService for FlakyProjection {
        async fn project(&self, request: ProjectionRequest<'_>) -> BatchResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(BatchError::retryable_projection(request.partition_name, "engine busy"));
            }
            Ok(format!("{} records", request.records.len()))
        }
    }

    #[tokio::test]
    async fn test_step_processes_all_chunks() {
        let temp = TempDir::new().unwrap();
        write_input(temp.path(), &["1", "2", "3", "4", "5"]);
        let metrics = Arc::new(MetricsCollector::new());
        let step = new_step(temp.path(), &metrics);

        let outcome = ChunkStep::new(&step, &settings(2, 0), Arc::new(EchoProjection::new()), Some(Arc::clone(&metrics)))
            .execute(step)
            .await;

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.step.read_count, 5);
        assert_eq!(outcome.step.write_count, 5);
        assert_eq!(outcome.step.exit_status, ExitStatus::Completed);

        let yield_table = fs::read_to_string(temp.path().join("output-partition0/YieldTable.csv")).unwrap();
        assert_eq!(yield_table.lines().count(), 6);

        let job = metrics.job_metrics("step-job").unwrap();
        let partition = &job.partition_metrics["partition0"];
        assert_eq!(partition.records_written, 5);
        assert_eq!(partition.exit_code, Some(ExitStatus::Completed));
    }

    #[tokio::test]
    async fn test_failing_records_are_skipped_individually() {
        let temp = TempDir::new().unwrap();
        write_input(temp.path(), &["1", "2", "3", "4"]);
        let metrics = Arc::new(MetricsCollector::new());
        let step = new_step(temp.path(), &metrics);
        let service = RejectingProjection {
            bad: ["2".to_string(), "4".to_string()].into_iter().collect(),
        };

        let outcome = ChunkStep::new(&step, &settings(4, 5), Arc::new(service), Some(Arc::clone(&metrics)))
            .execute(step)
            .await;

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.step.write_count, 2);
        assert_eq!(outcome.step.skip_count, 2);

        let job = metrics.job_metrics("step-job").unwrap();
        assert_eq!(job.total_skips, 2);
        assert_eq!(job.total_chunk_failures, 3);
        let skipped: Vec<_> = job
            .skip_details
            .iter()
            .filter_map(|d| d.feature_id.clone())
            .collect();
        assert_eq!(skipped, vec!["2", "4"]);
    }

    #[tokio::test]
    async fn test_skip_limit_fails_the_partition() {
        let temp = TempDir::new().unwrap();
        write_input(temp.path(), &["1", "2", "3"]);
        let metrics = Arc::new(MetricsCollector::new());
        let step = new_step(temp.path(), &metrics);
        let service = RejectingProjection {
            bad: ["1".to_string(), "2".to_string()].into_iter().collect(),
        };

        let outcome = ChunkStep::new(&step, &settings(1, 1), Arc::new(service), Some(Arc::clone(&metrics)))
            .execute(step)
            .await;

        let err = outcome.error.expect("step should fail");
        assert_eq!(err.code(), ErrorCode::SKIP_LIMIT_EXCEEDED);
        assert_eq!(outcome.step.exit_status, ExitStatus::Failed);
        assert_eq!(outcome.step.skip_count, 1);

        let job = metrics.job_metrics("step-job").unwrap();
        assert_eq!(
            job.partition_metrics["partition0"].exit_code,
            Some(ExitStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let temp = TempDir::new().unwrap();
        write_input(temp.path(), &["1", "2"]);
        let metrics = Arc::new(MetricsCollector::new());
        let step = new_step(temp.path(), &metrics);
        let service = FlakyProjection {
            failures: 2,
            calls: AtomicU32::new(0),
        };

        let outcome = ChunkStep::new(&step, &settings(10, 0), Arc::new(service), Some(Arc::clone(&metrics)))
            .execute(step)
            .await;

        assert!(outcome.is_success(), "{:?}", outcome.error);
        assert_eq!(outcome.step.write_count, 2);

        let job = metrics.job_metrics("step-job").unwrap();
        assert_eq!(job.failed_retries, 2);
        assert_eq!(job.successful_retries, 1);
    }

    #[tokio::test]
    async fn test_missing_parameters_abort_before_reading() {
        let temp = TempDir::new().unwrap();
        write_input(temp.path(), &["1"]);
        let metrics = Arc::new(MetricsCollector::new());
        let mut step = new_step(temp.path(), &metrics);
        step.projection_parameters_json = None;

        let outcome = ChunkStep::new(&step, &settings(10, 10), Arc::new(EchoProjection::new()), Some(metrics))
            .execute(step)
            .await;

        let err = outcome.error.expect("step should fail");
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_PROJECTION_PARAMETERS);
        assert_eq!(outcome.step.read_count, 0);
    }

    #[tokio::test]
    async fn test_missing_partition_directory_fails_step() {
        let temp = TempDir::new().unwrap();
        let metrics = Arc::new(MetricsCollector::new());
        let step = new_step(temp.path(), &metrics);

        let outcome = ChunkStep::new(&step, &settings(10, 10), Arc::new(EchoProjection::new()), Some(metrics))
            .execute(step)
            .await;
        assert_eq!(outcome.error.unwrap().code(), ErrorCode::READ_OPEN_FAILED);
    }
}
