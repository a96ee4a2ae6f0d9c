//! Per-job and per-partition metric records

use super::error::{MetricsError, MetricsResult};
use crate::model::job::ExitStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// One retry decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDetail {
    pub job_execution_id: u64,
    pub job_guid: String,
    pub attempt_number: u32,
    pub error_kind: String,
    pub error_message: String,
    pub successful: bool,
    pub partition_name: String,
    pub recorded_at: DateTime<Utc>,
}

/// One skipped record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipDetail {
    pub job_execution_id: u64,
    pub job_guid: String,
    pub feature_id: Option<String>,
    pub error_kind: String,
    pub error_message: String,
    pub partition_name: String,
    pub recorded_at: DateTime<Utc>,
}

/// A chunk the writer could not project as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailureDetail {
    pub partition_name: String,
    pub start_index: usize,
    pub record_count: usize,
    pub error_kind: String,
    pub error_message: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub records_written: u64,
    pub exit_code: Option<ExitStatus>,
}

impl PartitionMetrics {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Utc::now(),
            end_time: None,
            records_written: 0,
            exit_code: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Mark the partition finished; a partition completes at most once
    pub fn complete(
        &mut self,
        job_guid: &str,
        records_written: u64,
        exit_code: ExitStatus,
    ) -> MetricsResult<()> {
        if self.is_completed() {
            return Err(MetricsError::PartitionAlreadyCompleted {
                job_guid: job_guid.to_string(),
                partition: self.name.clone(),
            });
        }
        self.end_time = Some(Utc::now());
        self.records_written = records_written;
        self.exit_code = Some(exit_code);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub job_guid: String,
    pub job_execution_id: u64,
    pub status: ExitStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,

    pub total_records_read: u64,
    pub total_records_written: u64,
    pub total_records_processed: u64,

    pub total_retry_attempts: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,

    pub total_skips: u64,
    /// Skip counts keyed by error kind
    pub skip_reason_count: BTreeMap<String, u64>,

    pub total_chunk_failures: u64,

    pub retry_details: VecDeque<RetryDetail>,
    pub skip_details: VecDeque<SkipDetail>,
    pub chunk_failures: VecDeque<ChunkFailureDetail>,

    pub partition_metrics: BTreeMap<String, PartitionMetrics>,

    #[serde(skip, default = "default_max_detail_entries")]
    max_detail_entries: usize,
}

fn default_max_detail_entries() -> usize {
    super::collector::DEFAULT_MAX_DETAIL_ENTRIES
}

/// Append to a bounded history, dropping the oldest entries
fn push_bounded<T>(deque: &mut VecDeque<T>, item: T, max: usize) {
    deque.push_back(item);
    while deque.len() > max {
        deque.pop_front();
    }
}

impl JobMetrics {
    pub fn new(job_guid: impl Into<String>, job_execution_id: u64, max_detail_entries: usize) -> Self {
        Self {
            job_guid: job_guid.into(),
            job_execution_id,
            status: ExitStatus::Starting,
            start_time: Utc::now(),
            end_time: None,
            total_records_read: 0,
            total_records_written: 0,
            total_records_processed: 0,
            total_retry_attempts: 0,
            successful_retries: 0,
            failed_retries: 0,
            total_skips: 0,
            skip_reason_count: BTreeMap::new(),
            total_chunk_failures: 0,
            retry_details: VecDeque::new(),
            skip_details: VecDeque::new(),
            chunk_failures: VecDeque::new(),
            partition_metrics: BTreeMap::new(),
            max_detail_entries,
        }
    }

    pub(crate) fn add_retry(&mut self, detail: RetryDetail) {
        self.total_retry_attempts += 1;
        if detail.successful {
            self.successful_retries += 1;
        } else {
            self.failed_retries += 1;
        }
        push_bounded(&mut self.retry_details, detail, self.max_detail_entries);
    }

    pub(crate) fn add_skip(&mut self, detail: SkipDetail) {
        self.total_skips += 1;
        *self
            .skip_reason_count
            .entry(detail.error_kind.clone())
            .or_insert(0) += 1;
        push_bounded(&mut self.skip_details, detail, self.max_detail_entries);
    }

    pub(crate) fn add_chunk_failure(&mut self, detail: ChunkFailureDetail) {
        self.total_chunk_failures += 1;
        push_bounded(&mut self.chunk_failures, detail, self.max_detail_entries);
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}
