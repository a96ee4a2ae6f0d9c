//! Batch engine configuration
//!
//! Defaults are compiled in, a TOML file may override any table, and
//! `FOREST_BATCH_*` environment variables override the file.

use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::model::job::{positive_override, JobParameters};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod loader;

pub use loader::ConfigLoader;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub partitioning: PartitioningConfig,
    pub thread_pool: ThreadPoolConfig,
    pub retry: RetryConfig,
    pub skip: SkipConfig,
    pub metrics: MetricsConfig,
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitioningConfig {
    /// Partition count used when the job does not request one
    pub grid_size: i64,
    /// Records per chunk
    pub chunk_size: i64,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            grid_size: 4,
            chunk_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub core_pool_size: i64,
    pub max_pool_size_multiplier: i64,
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 4,
            max_pool_size_multiplier: 2,
            thread_name_prefix: "forest-batch-".to_string(),
        }
    }
}

impl ThreadPoolConfig {
    /// Upper bound on partitions running at once
    pub fn max_workers(&self) -> usize {
        (self.core_pool_size.max(1) * self.max_pool_size_multiplier.max(1)) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: i64,
    /// Fixed delay between attempts; zero disables the sleep
    #[serde(with = "humantime_serde")]
    pub backoff_period: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_period: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipConfig {
    pub max_count: i64,
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self { max_count: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Jobs retained after each run
    pub keep_count: i64,
    /// Bound of the retry and skip detail histories per job
    pub max_detail_entries: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            keep_count: 20,
            max_detail_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Yield table files smaller than this are ignored when recovering a header
    pub min_valid_file_size: u64,
    pub archive_name_prefix: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_valid_file_size: 64,
            archive_name_prefix: "forest-output".to_string(),
        }
    }
}

/// Effective step settings after job-level overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSettings {
    pub chunk_size: usize,
    pub max_retry_attempts: u32,
    pub retry_backoff: Duration,
    pub max_skip_count: u64,
}

impl BatchConfig {
    pub fn validate(&self) -> BatchResult<()> {
        let positive = |value: i64, key: &str| -> BatchResult<()> {
            if value <= 0 {
                return Err(BatchError::config_with_code(
                    ErrorCode::CONFIG_INVALID_VALUE,
                    format!("{key} must be configured with a positive value, got {value}"),
                ));
            }
            Ok(())
        };

        positive(self.partitioning.grid_size, "partitioning.grid_size")?;
        positive(self.partitioning.chunk_size, "partitioning.chunk_size")?;
        positive(self.thread_pool.core_pool_size, "thread_pool.core_pool_size")?;
        positive(
            self.thread_pool.max_pool_size_multiplier,
            "thread_pool.max_pool_size_multiplier",
        )?;
        positive(self.retry.max_attempts, "retry.max_attempts")?;

        if self.skip.max_count < 0 {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("skip.max_count must not be negative, got {}", self.skip.max_count),
            ));
        }
        if self.metrics.keep_count < 0 {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("metrics.keep_count must not be negative, got {}", self.metrics.keep_count),
            ));
        }
        if self.thread_pool.thread_name_prefix.trim().is_empty() {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_MISSING_PARAMETER,
                "thread_pool.thread_name_prefix must be configured",
            ));
        }
        if self.aggregation.archive_name_prefix.trim().is_empty() {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_MISSING_PARAMETER,
                "aggregation.archive_name_prefix must be configured",
            ));
        }
        Ok(())
    }

    /// Apply `FOREST_BATCH_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let int = |key: &str| lookup(key).and_then(|v| v.trim().parse::<i64>().ok());

        if let Some(v) = int("FOREST_BATCH_GRID_SIZE") {
            self.partitioning.grid_size = v;
        }
        if let Some(v) = int("FOREST_BATCH_CHUNK_SIZE") {
            self.partitioning.chunk_size = v;
        }
        if let Some(v) = int("FOREST_BATCH_MAX_RETRY_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Some(v) = lookup("FOREST_BATCH_RETRY_BACKOFF")
            .and_then(|v| humantime_serde::re::humantime::parse_duration(v.trim()).ok())
        {
            self.retry.backoff_period = v;
        }
        if let Some(v) = int("FOREST_BATCH_MAX_SKIP_COUNT") {
            self.skip.max_count = v;
        }
        if let Some(v) = int("FOREST_BATCH_CORE_POOL_SIZE") {
            self.thread_pool.core_pool_size = v;
        }
    }

    /// Partition count for a job: a positive job request, else the configured grid size
    pub fn grid_size_for(&self, params: &JobParameters) -> i64 {
        positive_override(params.partition_count)
            .and_then(|count| i64::try_from(count).ok())
            .unwrap_or(self.partitioning.grid_size)
    }

    /// Resolve per-step settings, letting positive job parameters win
    pub fn step_settings(&self, params: &JobParameters) -> StepSettings {
        let chunk_size = positive_override(params.chunk_size)
            .unwrap_or(self.partitioning.chunk_size.max(1) as u64);
        let max_retry_attempts = positive_override(params.max_retry_attempts)
            .unwrap_or(self.retry.max_attempts.max(0) as u64);
        let retry_backoff = positive_override(params.retry_backoff_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.retry.backoff_period);
        let max_skip_count = positive_override(params.max_skip_count)
            .unwrap_or(self.skip.max_count.max(0) as u64);

        StepSettings {
            chunk_size: chunk_size as usize,
            max_retry_attempts: max_retry_attempts.min(u32::MAX as u64) as u32,
            retry_backoff,
            max_skip_count,
        }
    }
}
