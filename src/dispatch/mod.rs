//! Partition dispatcher: master/worker fan-out over a bounded pool

pub mod handler;
pub mod partitioner;

pub use handler::{DispatchTotals, PartitionHandler, PartitionOutcome};
pub use partitioner::DynamicPartitioner;
