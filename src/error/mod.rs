use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;
pub mod helpers;

pub use crate::aggregation::error::AggregationError;
pub use crate::metrics::error::MetricsError;
pub use codes::{describe_error_code, ErrorCode};
pub use helpers::ErrorExt;

/// Boxed cause carried by error variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broad classification used by the fault tolerance policies and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Partitioning,
    DataRead,
    ReaderState,
    InvalidRecord,
    Projection,
    ResultStorage,
    SkipLimitExceeded,
    WorkerFailed,
    Metrics,
    Aggregation,
}

impl ErrorKind {
    /// Name used as the skip-reason histogram key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "ConfigurationError",
            Self::Partitioning => "PartitioningError",
            Self::DataRead => "DataReadError",
            Self::ReaderState => "ReaderStateError",
            Self::InvalidRecord => "InvalidRecordError",
            Self::Projection => "ProjectionError",
            Self::ResultStorage => "ResultStorageError",
            Self::SkipLimitExceeded => "SkipLimitExceeded",
            Self::WorkerFailed => "WorkerFailed",
            Self::Metrics => "MetricsError",
            Self::Aggregation => "AggregationError",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error type for the batch engine
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Configuration {
        code: u16,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[E{code:04}] Partitioning failed for job {job_guid}: {message}")]
    Partitioning {
        code: u16,
        message: String,
        job_guid: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[E{code:04}] [{partition}] Data read error: {message}")]
    DataRead {
        code: u16,
        message: String,
        partition: String,
        feature_id: Option<String>,
        path: Option<PathBuf>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[E{code:04}] [{partition}] {message}")]
    ReaderState {
        code: u16,
        message: String,
        partition: String,
    },

    #[error("[E{code:04}] [{partition}] Invalid record: {message}")]
    InvalidRecord {
        code: u16,
        message: String,
        partition: String,
        feature_id: Option<String>,
    },

    #[error("[E{code:04}] [{partition}] Projection failed (retryable: {retryable}): {message}")]
    Projection {
        code: u16,
        message: String,
        retryable: bool,
        partition: String,
        job_guid: Option<String>,
        job_execution_id: Option<u64>,
        feature_ids: Vec<String>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[E{code:04}] Result storage error: {message}")]
    ResultStorage {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[E{code:04}] [{partition}] Skip limit of {limit} exceeded: {last_error}")]
    SkipLimitExceeded {
        code: u16,
        limit: u64,
        partition: String,
        last_error: String,
    },

    #[error("[E{code:04}] [{partition}] Worker failed: {message}")]
    WorkerFailed {
        code: u16,
        message: String,
        partition: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}

impl BatchError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Configuration {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn partitioning(
        code: u16,
        job_guid: impl Into<String>,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        Self::Partitioning {
            code,
            message: message.into(),
            job_guid: job_guid.into(),
            path,
            source: None,
        }
    }

    pub fn data_read(
        code: u16,
        partition: impl Into<String>,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) -> Self {
        Self::DataRead {
            code,
            message: message.into(),
            partition: partition.into(),
            feature_id: None,
            path,
            source: None,
        }
    }

    /// Reader used before `open()` succeeded
    pub fn reader_not_opened(partition: impl Into<String>) -> Self {
        Self::ReaderState {
            code: ErrorCode::READ_NOT_OPENED,
            message: "Reader not opened. Call open() first.".to_string(),
            partition: partition.into(),
        }
    }

    pub fn invalid_record(
        partition: impl Into<String>,
        feature_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRecord {
            code: ErrorCode::RECORD_BLANK_FEATURE_ID,
            message: message.into(),
            partition: partition.into(),
            feature_id,
        }
    }

    /// Projection failure explicitly marked as eligible for retry
    pub fn retryable_projection(partition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::projection(ErrorCode::PROJECTION_TRANSIENT, true, partition, message)
    }

    /// Projection failure that must not be retried
    pub fn fatal_projection(partition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::projection(ErrorCode::PROJECTION_FATAL, false, partition, message)
    }

    fn projection(
        code: u16,
        retryable: bool,
        partition: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Projection {
            code,
            message: message.into(),
            retryable,
            partition: partition.into(),
            job_guid: None,
            job_execution_id: None,
            feature_ids: Vec::new(),
            source: None,
        }
    }

    pub fn storage(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::ResultStorage {
            code: ErrorCode::STORAGE_IO_ERROR,
            message: message.into(),
            path,
            source: None,
        }
    }

    pub fn worker_failed(
        code: u16,
        partition: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::WorkerFailed {
            code,
            message: message.into(),
            partition: partition.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    ///
    /// Variants without a source slot, and the wrapped subsystem errors,
    /// are returned unchanged.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::Configuration { source: src, .. }
            | Self::Partitioning { source: src, .. }
            | Self::DataRead { source: src, .. }
            | Self::Projection { source: src, .. }
            | Self::ResultStorage { source: src, .. }
            | Self::WorkerFailed { source: src, .. } => {
                *src = Some(source.into());
            }
            _ => {}
        }
        self
    }

    /// Attach the feature id of the failing record, where the variant has one
    pub fn with_feature_id(mut self, id: impl Into<String>) -> Self {
        match &mut self {
            Self::DataRead { feature_id, .. } | Self::InvalidRecord { feature_id, .. } => {
                *feature_id = Some(id.into());
            }
            Self::Projection { feature_ids, .. } => {
                *feature_ids = vec![id.into()];
            }
            _ => {}
        }
        self
    }

    /// Attach job attribution to a projection failure
    pub fn with_job(mut self, guid: impl Into<String>, execution_id: u64) -> Self {
        if let Self::Projection {
            job_guid,
            job_execution_id,
            ..
        } = &mut self
        {
            *job_guid = Some(guid.into());
            *job_execution_id = Some(execution_id);
        }
        self
    }

    /// Attach the feature ids of the chunk that failed to project
    pub fn with_feature_ids(mut self, ids: Vec<String>) -> Self {
        if let Self::Projection { feature_ids, .. } = &mut self {
            *feature_ids = ids;
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Configuration { code, .. }
            | Self::Partitioning { code, .. }
            | Self::DataRead { code, .. }
            | Self::ReaderState { code, .. }
            | Self::InvalidRecord { code, .. }
            | Self::Projection { code, .. }
            | Self::ResultStorage { code, .. }
            | Self::SkipLimitExceeded { code, .. }
            | Self::WorkerFailed { code, .. } => *code,
            Self::Metrics(_) => ErrorCode::METRICS_GENERIC,
            Self::Aggregation(_) => ErrorCode::AGGREGATION_GENERIC,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Partitioning { .. } => ErrorKind::Partitioning,
            Self::DataRead { .. } => ErrorKind::DataRead,
            Self::ReaderState { .. } => ErrorKind::ReaderState,
            Self::InvalidRecord { .. } => ErrorKind::InvalidRecord,
            Self::Projection { .. } => ErrorKind::Projection,
            Self::ResultStorage { .. } => ErrorKind::ResultStorage,
            Self::SkipLimitExceeded { .. } => ErrorKind::SkipLimitExceeded,
            Self::WorkerFailed { .. } => ErrorKind::WorkerFailed,
            Self::Metrics(_) => ErrorKind::Metrics,
            Self::Aggregation(_) => ErrorKind::Aggregation,
        }
    }

    /// Only projection failures explicitly marked retryable are retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Projection {
                retryable: true,
                ..
            }
        )
    }

    /// Whether the failing item may be dropped against the skip budget
    pub fn is_skippable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration { .. }
                | Self::InvalidRecord { .. }
                | Self::ReaderState { .. }
                | Self::SkipLimitExceeded { .. }
        )
    }

    /// Feature id of the failing record, when exactly one is known
    pub fn feature_id(&self) -> Option<&str> {
        match self {
            Self::DataRead { feature_id, .. } | Self::InvalidRecord { feature_id, .. } => {
                feature_id.as_deref()
            }
            Self::Projection { feature_ids, .. } if feature_ids.len() == 1 => {
                feature_ids.first().map(String::as_str)
            }
            _ => None,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => 2,
            Self::Partitioning { .. } => 3,
            Self::DataRead { .. } | Self::ReaderState { .. } | Self::InvalidRecord { .. } => 4,
            Self::Projection { .. } => 5,
            Self::ResultStorage { .. } | Self::Aggregation(_) => 6,
            Self::SkipLimitExceeded { .. } | Self::WorkerFailed { .. } => 7,
            Self::Metrics(_) => 1,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration { message, .. } => format!("Configuration problem: {}", message),
            Self::Partitioning {
                message, job_guid, ..
            } => format!("Could not partition input for job {}: {}", job_guid, message),
            Self::DataRead {
                message,
                partition,
                path,
                ..
            } => match path {
                Some(p) => format!("Failed to read {} in {}: {}", p.display(), partition, message),
                None => format!("Failed to read input in {}: {}", partition, message),
            },
            Self::Projection {
                message,
                partition,
                feature_ids,
                ..
            } => {
                if feature_ids.is_empty() {
                    format!("Projection failed in {}: {}", partition, message)
                } else {
                    format!(
                        "Projection failed in {} for feature ids [{}]: {}",
                        partition,
                        feature_ids.join(", "),
                        message
                    )
                }
            }
            Self::SkipLimitExceeded {
                limit, partition, ..
            } => format!(
                "Partition {} gave up after skipping {} records",
                partition, limit
            ),
            other => other.to_string(),
        }
    }
}

/// Type alias for Results using BatchError
pub type BatchResult<T> = std::result::Result<T, BatchError>;
