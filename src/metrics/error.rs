//! Error types for the metrics collector

/// Error type for metrics bookkeeping
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics already exist for job {job_guid}")]
    DuplicateJob { job_guid: String },

    #[error("No metrics found for job {job_guid}")]
    JobNotFound { job_guid: String },

    #[error("Partition {partition} of job {job_guid} was already initialized")]
    PartitionAlreadyInitialized { job_guid: String, partition: String },

    #[error("No metrics found for partition {partition} of job {job_guid}")]
    PartitionNotFound { job_guid: String, partition: String },

    #[error("Partition {partition} of job {job_guid} was already completed")]
    PartitionAlreadyCompleted { job_guid: String, partition: String },

    #[error("Keep count must not be negative, got {keep_count}")]
    InvalidKeepCount { keep_count: i64 },

    #[error("Metrics registry lock was poisoned")]
    LockPoisoned,
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;
