//! Job and partition metrics
//!
//! The collector is the only state shared between partition workers.

pub mod collector;
pub mod error;
pub mod model;

pub use collector::MetricsCollector;
pub use error::{MetricsError, MetricsResult};
pub use model::{ChunkFailureDetail, JobMetrics, PartitionMetrics, RetryDetail, SkipDetail};
