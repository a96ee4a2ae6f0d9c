//! Fan-out of partition workers onto a bounded pool, then fan-in

use super::partitioner::DynamicPartitioner;
use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::model::{ExitStatus, PartitionContext};
use crate::pipeline::StepOutcome;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, info_span, warn, Instrument};

/// Terminal report of one partition worker
#[derive(Debug)]
pub struct PartitionOutcome {
    pub partition: PartitionContext,
    pub exit_status: ExitStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub error: Option<BatchError>,
}

impl PartitionOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_status == ExitStatus::Completed && self.error.is_none()
    }

    fn panicked(partition: PartitionContext, message: String) -> Self {
        let error = BatchError::worker_failed(ErrorCode::WORKER_PANICKED, &partition.name, message);
        Self {
            partition,
            exit_status: ExitStatus::Failed,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            error: Some(error),
        }
    }
}

impl From<StepOutcome> for PartitionOutcome {
    fn from(outcome: StepOutcome) -> Self {
        let step = outcome.step;
        Self {
            exit_status: step.exit_status,
            read_count: step.read_count,
            write_count: step.write_count,
            skip_count: step.skip_count,
            partition: step.partition,
            error: outcome.error,
        }
    }
}

/// Totals over all partitions of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTotals {
    pub partitions: usize,
    pub failed: usize,
    pub read: u64,
    pub written: u64,
    pub skipped: u64,
}

impl DispatchTotals {
    pub fn from_outcomes(outcomes: &[PartitionOutcome]) -> Self {
        outcomes.iter().fold(
            Self {
                partitions: outcomes.len(),
                ..Default::default()
            },
            |mut totals, o| {
                if !o.is_success() {
                    totals.failed += 1;
                }
                totals.read += o.read_count;
                totals.written += o.write_count;
                totals.skipped += o.skip_count;
                totals
            },
        )
    }
}

/// Master side of the partitioned step
pub struct PartitionHandler {
    partitioner: DynamicPartitioner,
    grid_size: i64,
    max_workers: usize,
    thread_name_prefix: String,
}

impl PartitionHandler {
    pub fn new(grid_size: i64, max_workers: usize) -> Self {
        Self {
            partitioner: DynamicPartitioner::new(),
            grid_size,
            max_workers: max_workers.max(1),
            thread_name_prefix: "forest-batch-".to_string(),
        }
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn grid_size(&self) -> i64 {
        self.grid_size
    }

    /// Run `worker` once per partition and wait for every one to finish
    ///
    /// A failing or panicking partition does not stop its siblings.
    /// Outcomes are returned in partition index order.
    pub async fn handle<F>(&mut self, job_base_dir: &Path, worker: F) -> BatchResult<Vec<PartitionOutcome>>
    where
        F: Fn(PartitionContext) -> BoxFuture<'static, StepOutcome> + Send + Sync + 'static,
    {
        self.partitioner.set_job_base_dir(job_base_dir);
        let contexts = self.partitioner.partition(self.grid_size)?;

        info!(
            "Dispatching {} partitions (max parallel: {}) from {}",
            contexts.len(),
            self.max_workers,
            job_base_dir.display()
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let worker = Arc::new(worker);
        let mut futures = FuturesUnordered::new();

        for context in contexts {
            let semaphore = Arc::clone(&semaphore);
            let worker = Arc::clone(&worker);
            let span = info_span!(
                "worker",
                worker = %format!("{}{}", self.thread_name_prefix, context.index),
                partition = %context.name
            );
            let task_context = context.clone();

            let handle = tokio::spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| {
                        BatchError::worker_failed(
                            ErrorCode::WORKER_FAILED,
                            &task_context.name,
                            "Worker pool was closed",
                        )
                        .with_source(e)
                    })?;
                    Ok::<_, BatchError>(worker(task_context).await)
                }
                .instrument(span),
            );
            futures.push(async move { (context, handle.await) });
        }

        let mut outcomes = Vec::new();
        while let Some((context, joined)) = futures.next().await {
            let outcome = match joined {
                Ok(Ok(step_outcome)) => PartitionOutcome::from(step_outcome),
                Ok(Err(e)) => {
                    warn!("[Partition: {}] Worker could not start: {}", context.name, e);
                    PartitionOutcome {
                        partition: context,
                        exit_status: ExitStatus::Failed,
                        read_count: 0,
                        write_count: 0,
                        skip_count: 0,
                        error: Some(e),
                    }
                }
                Err(e) => {
                    warn!("[Partition: {}] Worker task panicked: {}", context.name, e);
                    PartitionOutcome::panicked(context, format!("Worker task panicked: {}", e))
                }
            };
            outcomes.push(outcome);
        }

        outcomes.sort_by_key(|o| o.partition.index);
        let totals = DispatchTotals::from_outcomes(&outcomes);
        info!(
            "All {} partitions finished: {} failed, read={}, written={}, skipped={}",
            totals.partitions, totals.failed, totals.read, totals.written, totals.skipped
        );
        Ok(outcomes)
    }
}
