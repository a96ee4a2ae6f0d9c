//! Input partitioning
//!
//! Splits the submitted polygon and layer CSV files into balanced,
//! feature-keyed partitions on disk.

pub mod csv_line;
pub mod input;

pub use input::{balanced_sizes, CsvSource, InputPartitioner, PartitionSummary};
