use super::projection::{ProjectionParameters, ProjectionRequest, ProjectionService};
use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::metrics::MetricsCollector;
use crate::model::naming::projection_id;
use crate::model::{BatchRecord, ChunkMetadata, StepExecution};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct WriterContext {
    job_guid: String,
    job_execution_id: u64,
    job_base_dir: PathBuf,
    parameters: ProjectionParameters,
}

/// Hands each chunk to the projection service
pub struct ProjectionWriter {
    service: Arc<dyn ProjectionService>,
    metrics: Option<Arc<MetricsCollector>>,
    context: Option<WriterContext>,
}

impl ProjectionWriter {
    pub fn new(service: Arc<dyn ProjectionService>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            service,
            metrics,
            context: None,
        }
    }

    pub fn parameters(&self) -> Option<&ProjectionParameters> {
        self.context.as_ref().map(|c| &c.parameters)
    }

    /// Parse the job's projection parameters; allowed once per step
    pub fn before_step(&mut self, step: &StepExecution) -> BatchResult<()> {
        if self.context.is_some() {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_ALREADY_INITIALIZED,
                format!(
                    "ProjectionWriter already initialized for {}; before_step must only be called once",
                    step.partition_name()
                ),
            ));
        }

        let json = step
            .projection_parameters_json
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                BatchError::config_with_code(
                    ErrorCode::CONFIG_INVALID_PROJECTION_PARAMETERS,
                    format!(
                        "[GUID: {}, EXEID: {}] Projection parameters are missing",
                        step.job_guid, step.job_execution_id
                    ),
                )
            })?;

        let parameters: Option<ProjectionParameters> = serde_json::from_str(json).map_err(|e| {
            BatchError::config_with_code(
                ErrorCode::CONFIG_INVALID_PROJECTION_PARAMETERS,
                format!(
                    "[GUID: {}, EXEID: {}] JSON parsing failed during parameter deserialization",
                    step.job_guid, step.job_execution_id
                ),
            )
            .with_source(e)
        })?;
        let parameters = parameters.ok_or_else(|| {
            BatchError::config_with_code(
                ErrorCode::CONFIG_INVALID_PROJECTION_PARAMETERS,
                format!(
                    "[GUID: {}, EXEID: {}] Parameter deserialization resulted in null",
                    step.job_guid, step.job_execution_id
                ),
            )
        })?;

        info!(
            "[GUID: {}, EXEID: {}, Partition: {}] Projection writer initialized, {} execution options",
            step.job_guid,
            step.job_execution_id,
            step.partition_name(),
            parameters.selected_execution_options.len()
        );

        self.context = Some(WriterContext {
            job_guid: step.job_guid.clone(),
            job_execution_id: step.job_execution_id,
            job_base_dir: step.job_base_dir.clone(),
            parameters,
        });
        Ok(())
    }

    /// Project one chunk
    ///
    /// Failures are accounted as chunk failures and returned unchanged so
    /// the step's retry and skip policies can decide what happens next.
    pub async fn write(&self, records: &[BatchRecord], chunk: &ChunkMetadata) -> BatchResult<String> {
        let Some(ctx) = &self.context else {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_INVALID_PROJECTION_PARAMETERS,
                "Projection parameters not initialized; before_step was not called or failed",
            ));
        };

        if records.is_empty() {
            debug!(
                "[GUID: {}, EXEID: {}, Partition: {}] Empty chunk received, skipping",
                ctx.job_guid, ctx.job_execution_id, chunk.partition_name
            );
            return Ok(String::new());
        }

        let id = projection_id(
            ctx.job_execution_id,
            &chunk.partition_name,
            &format!("chunk{}", chunk.start_index),
        );
        let request = ProjectionRequest {
            records,
            partition_name: &chunk.partition_name,
            parameters: &ctx.parameters,
            job_execution_id: ctx.job_execution_id,
            job_guid: &ctx.job_guid,
            job_base_dir: &ctx.job_base_dir,
            projection_id: &id,
        };

        match self.service.project(request).await {
            Ok(summary) => {
                info!(
                    "[GUID: {}, EXEID: {}, Partition: {}] Processed chunk of {} records. Result: {}",
                    ctx.job_guid,
                    ctx.job_execution_id,
                    chunk.partition_name,
                    records.len(),
                    summary
                );
                Ok(summary)
            }
            Err(err) => {
                let err = err
                    .with_job(&ctx.job_guid, ctx.job_execution_id)
                    .with_feature_ids(records.iter().map(|r| r.feature_id.clone()).collect());
                if let Some(metrics) = &self.metrics {
                    if let Err(e) = metrics.record_chunk_failure(&ctx.job_guid, chunk, &err) {
                        warn!(
                            "[GUID: {}, EXEID: {}, Partition: {}] Failed to record chunk failure: {}",
                            ctx.job_guid, ctx.job_execution_id, chunk.partition_name, e
                        );
                    }
                }
                Err(err)
            }
        }
    }
}
