//! Process-wide registry of job metrics
//!
//! One `MetricsCollector` is created by the top-level composition and shared
//! by `Arc` with every partition worker. All mutation goes through a single
//! mutex so each operation is atomic with respect to the others.

use super::error::{MetricsError, MetricsResult};
use super::model::{ChunkFailureDetail, JobMetrics, PartitionMetrics, RetryDetail, SkipDetail};
use crate::error::BatchError;
use crate::model::job::ExitStatus;
use crate::model::ChunkMetadata;
use chrono::Utc;
use lru::LruCache;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub const DEFAULT_MAX_DETAIL_ENTRIES: usize = 1000;

/// Thread-safe map from job guid to `JobMetrics`
///
/// Entries are only ever read with `peek`, so the cache order is insertion
/// order and `cleanup_old_metrics` evicts the oldest jobs first.
pub struct MetricsCollector {
    jobs: Mutex<LruCache<String, JobMetrics>>,
    max_detail_entries: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_max_detail_entries(DEFAULT_MAX_DETAIL_ENTRIES)
    }

    /// Bound the retry, skip and chunk-failure histories of each job
    pub fn with_max_detail_entries(max_detail_entries: usize) -> Self {
        Self {
            jobs: Mutex::new(LruCache::unbounded()),
            max_detail_entries,
        }
    }

    fn lock(&self) -> MetricsResult<MutexGuard<'_, LruCache<String, JobMetrics>>> {
        self.jobs.lock().map_err(|_| MetricsError::LockPoisoned)
    }

    fn with_job<R>(
        &self,
        job_guid: &str,
        f: impl FnOnce(&mut JobMetrics) -> MetricsResult<R>,
    ) -> MetricsResult<R> {
        let mut jobs = self.lock()?;
        let metrics = jobs
            .peek_mut(job_guid)
            .ok_or_else(|| MetricsError::JobNotFound {
                job_guid: job_guid.to_string(),
            })?;
        f(metrics)
    }

    /// Register a new job; a guid that is still present is rejected
    pub fn initialize_metrics(&self, job_guid: &str, job_execution_id: u64) -> MetricsResult<()> {
        let mut jobs = self.lock()?;
        if jobs.contains(job_guid) {
            return Err(MetricsError::DuplicateJob {
                job_guid: job_guid.to_string(),
            });
        }
        jobs.put(
            job_guid.to_string(),
            JobMetrics::new(job_guid, job_execution_id, self.max_detail_entries),
        );
        debug!(
            "[GUID: {}, EXEID: {}] Initialized job metrics",
            job_guid, job_execution_id
        );
        Ok(())
    }

    pub fn initialize_partition_metrics(&self, job_guid: &str, partition: &str) -> MetricsResult<()> {
        self.with_job(job_guid, |metrics| {
            if metrics.partition_metrics.contains_key(partition) {
                return Err(MetricsError::PartitionAlreadyInitialized {
                    job_guid: job_guid.to_string(),
                    partition: partition.to_string(),
                });
            }
            metrics
                .partition_metrics
                .insert(partition.to_string(), PartitionMetrics::new(partition));
            metrics.status = ExitStatus::Executing;
            debug!(
                "[GUID: {}, Partition: {}] Initialized partition metrics",
                job_guid, partition
            );
            Ok(())
        })
    }

    pub fn complete_partition_metrics(
        &self,
        job_guid: &str,
        partition: &str,
        records_written: u64,
        exit_code: ExitStatus,
    ) -> MetricsResult<()> {
        self.with_job(job_guid, |metrics| {
            let partition_metrics = metrics.partition_metrics.get_mut(partition).ok_or_else(|| {
                MetricsError::PartitionNotFound {
                    job_guid: job_guid.to_string(),
                    partition: partition.to_string(),
                }
            })?;
            partition_metrics.complete(job_guid, records_written, exit_code)?;
            info!(
                "[GUID: {}, Partition: {}] Completed partition metrics, written: {}, exit code: {}",
                job_guid, partition, records_written, exit_code
            );
            Ok(())
        })
    }

    /// Record end time, final status and totals for a job
    pub fn finalize_job_metrics(
        &self,
        job_guid: &str,
        status: ExitStatus,
        total_read: u64,
        total_written: u64,
    ) -> MetricsResult<()> {
        self.with_job(job_guid, |metrics| {
            metrics.end_time = Some(Utc::now());
            metrics.status = status;
            metrics.total_records_read = metrics.total_records_read.max(total_read);
            metrics.total_records_written = metrics.total_records_written.max(total_written);
            metrics.total_records_processed = metrics.total_records_written;
            info!(
                "[GUID: {}, EXEID: {}] Finalized job metrics: status={}, read={}, written={}",
                job_guid, metrics.job_execution_id, status, total_read, total_written
            );
            Ok(())
        })
    }

    pub fn record_retry_attempt(
        &self,
        job_guid: &str,
        job_execution_id: u64,
        attempt_number: u32,
        error: &BatchError,
        successful: bool,
        partition: &str,
    ) -> MetricsResult<()> {
        let detail = RetryDetail {
            job_execution_id,
            job_guid: job_guid.to_string(),
            attempt_number,
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            successful,
            partition_name: partition.to_string(),
            recorded_at: Utc::now(),
        };
        self.with_job(job_guid, |metrics| {
            metrics.add_retry(detail);
            Ok(())
        })
    }

    pub fn record_skip(
        &self,
        job_guid: &str,
        job_execution_id: u64,
        feature_id: Option<&str>,
        error: &BatchError,
        partition: &str,
    ) -> MetricsResult<()> {
        let detail = SkipDetail {
            job_execution_id,
            job_guid: job_guid.to_string(),
            feature_id: feature_id.map(str::to_string),
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            partition_name: partition.to_string(),
            recorded_at: Utc::now(),
        };
        self.with_job(job_guid, |metrics| {
            metrics.add_skip(detail);
            Ok(())
        })
    }

    /// Account a whole-chunk writer failure; kept apart from skip totals
    pub fn record_chunk_failure(
        &self,
        job_guid: &str,
        chunk: &ChunkMetadata,
        error: &BatchError,
    ) -> MetricsResult<()> {
        let detail = ChunkFailureDetail {
            partition_name: chunk.partition_name.clone(),
            start_index: chunk.start_index,
            record_count: chunk.record_count,
            error_kind: error.kind().to_string(),
            error_message: error.to_string(),
            recorded_at: Utc::now(),
        };
        self.with_job(job_guid, |metrics| {
            metrics.add_chunk_failure(detail);
            Ok(())
        })
    }

    /// Keep only the `keep_count` most recently inserted jobs
    ///
    /// Returns the number of jobs evicted.
    pub fn cleanup_old_metrics(&self, keep_count: i64) -> MetricsResult<usize> {
        if keep_count < 0 {
            return Err(MetricsError::InvalidKeepCount { keep_count });
        }
        let keep = keep_count as usize;
        let mut jobs = self.lock()?;
        let mut evicted = 0;
        while jobs.len() > keep {
            match jobs.pop_lru() {
                Some((guid, _)) => {
                    debug!("[GUID: {}] Evicted job metrics", guid);
                    evicted += 1;
                }
                None => break,
            }
        }
        Ok(evicted)
    }

    /// Snapshot of one job's metrics
    pub fn job_metrics(&self, job_guid: &str) -> Option<JobMetrics> {
        self.jobs.lock().ok()?.peek(job_guid).cloned()
    }

    /// Snapshots of all jobs, oldest first
    pub fn all_job_metrics(&self) -> Vec<JobMetrics> {
        match self.jobs.lock() {
            Ok(jobs) => jobs.iter().rev().map(|(_, m)| m.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn remove_metrics(&self, job_guid: &str) -> MetricsResult<Option<JobMetrics>> {
        Ok(self.lock()?.pop(job_guid))
    }

    pub fn clear_all_metrics(&self) -> MetricsResult<()> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
