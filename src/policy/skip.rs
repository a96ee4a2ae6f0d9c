//! Skip decisions for records that cannot be read, processed or projected

use super::StepSnapshot;
use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::metrics::MetricsCollector;
use crate::model::StepExecution;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SkipPolicy {
    max_skip_count: u64,
    metrics: Option<Arc<MetricsCollector>>,
    snapshot: StepSnapshot,
}

impl SkipPolicy {
    pub fn new(max_skip_count: u64) -> Self {
        Self {
            max_skip_count,
            metrics: None,
            snapshot: StepSnapshot::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_skip_count(&self) -> u64 {
        self.max_skip_count
    }

    pub fn before_step(&mut self, step: &StepExecution) {
        self.snapshot = StepSnapshot::capture(step);
    }

    /// Decide whether the failing item may be skipped
    ///
    /// `skip_count` is the number of items already skipped in this step.
    /// Returns `Err(SkipLimitExceeded)` once the budget is spent, which
    /// fails the step. Non-skippable errors return `Ok(false)`.
    pub fn should_skip(
        &self,
        error: &BatchError,
        skip_count: u64,
        step: Option<&StepExecution>,
    ) -> BatchResult<bool> {
        let attribution = self.snapshot.resolve(step);

        if !error.is_skippable() {
            debug!(
                "[{}] {} is not skippable: {}",
                attribution.partition_name,
                error.kind(),
                error
            );
            return Ok(false);
        }

        if skip_count >= self.max_skip_count {
            warn!(
                "[{}] Skip limit of {} reached",
                attribution.partition_name, self.max_skip_count
            );
            return Err(BatchError::SkipLimitExceeded {
                code: ErrorCode::SKIP_LIMIT_EXCEEDED,
                limit: self.max_skip_count,
                partition: attribution.partition_name,
                last_error: error.to_string(),
            });
        }

        if let (Some(metrics), Some(guid), Some(execution_id)) = (
            self.metrics.as_ref(),
            attribution.job_guid.as_deref(),
            attribution.job_execution_id,
        ) {
            if let Err(e) = metrics.record_skip(
                guid,
                execution_id,
                error.feature_id(),
                error,
                &attribution.partition_name,
            ) {
                warn!(
                    "[GUID: {}, EXEID: {}, Partition: {}] Failed to record skip: {}",
                    guid, execution_id, attribution.partition_name, e
                );
            }
        }

        warn!(
            "[{}] Skipping {} (skip {} of {}): {}",
            attribution.partition_name,
            error
                .feature_id()
                .map(|id| format!("feature {}", id))
                .unwrap_or_else(|| "item".to_string()),
            skip_count + 1,
            self.max_skip_count,
            error
        );
        Ok(true)
    }
}
