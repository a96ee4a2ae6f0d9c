use super::partition::PartitionContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Parameters supplied with a job submission
///
/// Optional numeric overrides take precedence over configuration only when
/// present and positive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameters {
    pub job_guid: String,
    pub job_base_dir: PathBuf,
    #[serde(default)]
    pub partition_count: Option<i64>,
    /// Serialized projection parameters, parsed once per step by the writer
    #[serde(default)]
    pub projection_parameters_json: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<i64>,
    #[serde(default)]
    pub max_retry_attempts: Option<i64>,
    #[serde(default)]
    pub retry_backoff_ms: Option<i64>,
    #[serde(default)]
    pub max_skip_count: Option<i64>,
}

impl JobParameters {
    pub fn new(job_guid: impl Into<String>, job_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_guid: job_guid.into(),
            job_base_dir: job_base_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_partition_count(mut self, count: i64) -> Self {
        self.partition_count = Some(count);
        self
    }

    pub fn with_projection_parameters(mut self, json: impl Into<String>) -> Self {
        self.projection_parameters_json = Some(json.into());
        self
    }
}

/// Pick the job-level override when it is present and positive
pub fn positive_override(value: Option<i64>) -> Option<u64> {
    value.filter(|v| *v > 0).map(|v| v as u64)
}

/// An accepted job; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub guid: String,
    pub execution_id: u64,
    pub base_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub requested_partition_count: Option<i64>,
}

impl Job {
    pub fn new(execution_id: u64, params: &JobParameters) -> Self {
        Self {
            guid: params.job_guid.clone(),
            execution_id,
            base_dir: params.job_base_dir.clone(),
            created_at: Utc::now(),
            requested_partition_count: params.partition_count,
        }
    }
}

/// Terminal or running state of a step or job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
    Starting,
    Executing,
    Completed,
    Failed,
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one partition's worker step
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub job_guid: String,
    pub job_execution_id: u64,
    pub job_base_dir: PathBuf,
    pub partition: PartitionContext,
    pub projection_parameters_json: Option<String>,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub exit_status: ExitStatus,
}

impl StepExecution {
    pub fn new(job: &Job, partition: PartitionContext, projection_parameters_json: Option<String>) -> Self {
        Self {
            job_guid: job.guid.clone(),
            job_execution_id: job.execution_id,
            job_base_dir: job.base_dir.clone(),
            partition,
            projection_parameters_json,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            exit_status: ExitStatus::Starting,
        }
    }

    pub fn partition_name(&self) -> &str {
        &self.partition.name
    }
}
