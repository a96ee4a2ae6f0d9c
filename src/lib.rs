//! # forest-batch
//!
//! Partitioned batch engine for forest inventory projections.
//!
//! A job splits a polygon CSV and a layer CSV into balanced, feature-keyed
//! partitions, runs each partition through a chunked read/process/write
//! pipeline on a bounded worker pool, and merges the partition results into
//! a single ZIP archive.
//!
//! ## Modules
//!
//! - `aggregation` - Yield table and log merge, archive packaging and cleanup
//! - `app` - Process settings and logging for the binary
//! - `config` - Batch configuration with TOML and environment overrides
//! - `dispatch` - Partition contexts and the bounded worker fan-out
//! - `error` - Error taxonomy with stable error codes
//! - `job` - End-to-end job lifecycle
//! - `metrics` - Per-job and per-partition metrics
//! - `model` - Jobs, steps, partitions, records and naming conventions
//! - `partition` - Input partitioning and CSV line helpers
//! - `pipeline` - Reader, processor, writer and the chunk step
//! - `policy` - Retry and skip policies
pub mod aggregation;
pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod metrics;
pub mod model;
pub mod partition;
pub mod pipeline;
pub mod policy;

pub use error::{BatchError, BatchResult};
