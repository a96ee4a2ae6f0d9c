//! Fault tolerance policies consulted by the chunk pipeline
//!
//! - [`RetryPolicy`] decides whether a failed chunk write is attempted again
//! - [`SkipPolicy`] decides whether a failed record may be dropped

pub mod retry;
pub mod skip;

pub use retry::{RetryContext, RetryPolicy};
pub use skip::SkipPolicy;

use crate::model::StepExecution;

const UNKNOWN_PARTITION: &str = "unknown";

/// Step identity captured in `before_step` for attribution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct StepSnapshot {
    pub job_guid: Option<String>,
    pub job_execution_id: Option<u64>,
    pub partition_name: Option<String>,
}

impl StepSnapshot {
    pub fn capture(step: &StepExecution) -> Self {
        Self {
            job_guid: Some(step.job_guid.clone()),
            job_execution_id: Some(step.job_execution_id),
            partition_name: Some(step.partition_name().to_string()),
        }
    }

    /// Prefer the live step, fall back to the snapshot
    pub fn resolve(&self, live: Option<&StepExecution>) -> Attribution {
        let live_partition = live
            .map(|s| s.partition_name())
            .filter(|name| !name.trim().is_empty());

        Attribution {
            job_guid: live
                .map(|s| s.job_guid.clone())
                .or_else(|| self.job_guid.clone()),
            job_execution_id: live
                .map(|s| s.job_execution_id)
                .or(self.job_execution_id),
            partition_name: live_partition
                .map(str::to_string)
                .or_else(|| self.partition_name.clone())
                .unwrap_or_else(|| UNKNOWN_PARTITION.to_string()),
        }
    }
}

/// Who a retry or skip decision is accounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attribution {
    pub job_guid: Option<String>,
    pub job_execution_id: Option<u64>,
    pub partition_name: String,
}
