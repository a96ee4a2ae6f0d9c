//! Result aggregation
//!
//! Merges every partition's yield table and logs into one ZIP archive,
//! validates it, and removes the partition directories afterwards.

pub mod error;
pub mod logs;
pub mod service;
pub mod yield_table;

pub use error::{AggregationError, AggregationResult};
pub use logs::LogType;
pub use service::ResultAggregationService;
pub use yield_table::{TableNumberAssigner, YieldMergeStats};
