//! Retry decisions for failed chunk writes
//!
//! Only errors explicitly marked retryable are ever retried. Each granted
//! retry sleeps for a fixed backoff before returning.

use super::StepSnapshot;
use crate::error::BatchError;
use crate::metrics::MetricsCollector;
use crate::model::StepExecution;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// State of the operation being retried
#[derive(Debug)]
pub struct RetryContext<'a> {
    /// Retries already performed for this operation
    pub retry_count: u32,
    pub last_error: Option<&'a BatchError>,
    /// Live step, when the caller has one
    pub step: Option<&'a StepExecution>,
    /// Set when a backoff sleep was cut short by an interrupt
    pub interrupted: bool,
}

impl<'a> RetryContext<'a> {
    pub fn new(retry_count: u32, last_error: &'a BatchError) -> Self {
        Self {
            retry_count,
            last_error: Some(last_error),
            step: None,
            interrupted: false,
        }
    }

    pub fn with_step(mut self, step: &'a StepExecution) -> Self {
        self.step = Some(step);
        self
    }
}

pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    metrics: Option<Arc<MetricsCollector>>,
    interrupt: Option<Arc<Notify>>,
    snapshot: StepSnapshot,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            metrics: None,
            interrupt: None,
            snapshot: StepSnapshot::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Allow the backoff sleep to be woken early through `notify`
    pub fn with_interrupt(mut self, notify: Arc<Notify>) -> Self {
        self.interrupt = Some(notify);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Capture job and partition identity for attribution
    pub fn before_step(&mut self, step: &StepExecution) {
        self.snapshot = StepSnapshot::capture(step);
    }

    /// Decide whether the last failure may be retried
    ///
    /// Metrics failures are logged and never change the decision. An
    /// interrupted backoff sets `ctx.interrupted` but still grants the retry.
    pub async fn can_retry(&self, ctx: &mut RetryContext<'_>) -> bool {
        let Some(error) = ctx.last_error else {
            return false;
        };

        if !error.is_retryable() {
            debug!(
                "Non-retryable failure ({}), leaving it to the skip policy: {}",
                error.kind(),
                error
            );
            return false;
        }

        let granted = ctx.retry_count < self.max_attempts;
        let attempt_number = ctx.retry_count.saturating_add(1);
        let attribution = self.snapshot.resolve(ctx.step);

        self.record_attempt(
            attribution.job_guid.as_deref(),
            attribution.job_execution_id,
            attempt_number,
            error,
            false,
            &attribution.partition_name,
        );

        if granted {
            info!(
                "[{}] Retry attempt {} of {}. Error: {}",
                attribution.partition_name, attempt_number, self.max_attempts, error
            );
            ctx.interrupted = self.sleep_backoff().await;
        } else {
            warn!(
                "[{}] Max retry attempts ({}) reached. Giving up: {}",
                attribution.partition_name, self.max_attempts, error
            );
        }

        granted
    }

    /// Record that an operation succeeded after at least one retry
    pub fn on_retry_success(&self, retries: u32, error: &BatchError, step: Option<&StepExecution>) {
        if retries == 0 {
            return;
        }
        let attribution = self.snapshot.resolve(step);
        self.record_attempt(
            attribution.job_guid.as_deref(),
            attribution.job_execution_id,
            retries.saturating_add(1),
            error,
            true,
            &attribution.partition_name,
        );
        info!(
            "[{}] Operation succeeded after {} retries",
            attribution.partition_name, retries
        );
    }

    fn record_attempt(
        &self,
        job_guid: Option<&str>,
        job_execution_id: Option<u64>,
        attempt_number: u32,
        error: &BatchError,
        successful: bool,
        partition: &str,
    ) {
        let (Some(metrics), Some(guid), Some(execution_id)) =
            (self.metrics.as_ref(), job_guid, job_execution_id)
        else {
            return;
        };
        if let Err(e) = metrics.record_retry_attempt(
            guid,
            execution_id,
            attempt_number,
            error,
            successful,
            partition,
        ) {
            warn!(
                "[GUID: {}, EXEID: {}, Partition: {}] Failed to record retry attempt: {}",
                guid, execution_id, partition, e
            );
        }
    }

    /// Returns true when the sleep was interrupted
    async fn sleep_backoff(&self) -> bool {
        if self.backoff.is_zero() {
            return false;
        }
        match &self.interrupt {
            Some(notify) => {
                tokio::select! {
                    _ = tokio::time::sleep(self.backoff) => false,
                    _ = notify.notified() => {
                        warn!("Retry backoff interrupted; retry still proceeds");
                        true
                    }
                }
            }
            None => {
                tokio::time::sleep(self.backoff).await;
                false
            }
        }
    }
}
