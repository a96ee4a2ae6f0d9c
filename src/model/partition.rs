use super::naming;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Execution context for one partition worker
///
/// Produced by the dispatcher, consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionContext {
    pub index: usize,
    pub name: String,
    pub job_base_dir: Option<PathBuf>,
}

impl PartitionContext {
    pub fn new(index: usize, job_base_dir: Option<PathBuf>) -> Self {
        Self {
            index,
            name: naming::partition_name(index),
            job_base_dir,
        }
    }
}
