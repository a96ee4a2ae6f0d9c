use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::metrics::MetricsCollector;
use crate::model::{BatchRecord, StepExecution};
use std::sync::Arc;
use tracing::trace;

/// Validating pass-through between reader and writer
pub struct RecordProcessor {
    metrics: Option<Arc<MetricsCollector>>,
    initialized: bool,
    job_guid: String,
    job_execution_id: u64,
    partition_name: String,
}

impl RecordProcessor {
    pub fn new(metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            metrics,
            initialized: false,
            job_guid: String::new(),
            job_execution_id: 0,
            partition_name: String::new(),
        }
    }

    /// Bind to the step and register its partition metrics
    ///
    /// Must be called exactly once per step execution.
    pub fn before_step(&mut self, step: &StepExecution) -> BatchResult<()> {
        if self.initialized {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_ALREADY_INITIALIZED,
                format!(
                    "RecordProcessor already initialized for {}; before_step must only be called once",
                    self.partition_name
                ),
            ));
        }

        self.job_guid = step.job_guid.clone();
        self.job_execution_id = step.job_execution_id;
        self.partition_name = step.partition_name().to_string();

        if let Some(metrics) = &self.metrics {
            metrics.initialize_partition_metrics(&self.job_guid, &self.partition_name)?;
        }

        trace!(
            "[GUID: {}, EXEID: {}, Partition: {}] Record processor initialized",
            self.job_guid, self.job_execution_id, self.partition_name
        );
        self.initialized = true;
        Ok(())
    }

    pub fn process(&self, record: BatchRecord) -> BatchResult<BatchRecord> {
        if record.feature_id.trim().is_empty() {
            return Err(BatchError::invalid_record(
                &record.partition_name,
                None,
                "Record has a blank feature id",
            ));
        }
        trace!(
            "[GUID: {}, EXEID: {}, Partition: {}] Passing through feature {}",
            self.job_guid, self.job_execution_id, self.partition_name, record.feature_id
        );
        Ok(record)
    }
}
