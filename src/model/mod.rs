//! Domain model shared by the batch components
//!
//! Job and step state is carried in typed structs passed by value into each
//! worker, never in a string-keyed context bag.

pub mod job;
pub mod naming;
pub mod partition;
pub mod record;

pub use job::{ExitStatus, Job, JobParameters, StepExecution};
pub use partition::PartitionContext;
pub use record::{BatchRecord, ChunkMetadata};
