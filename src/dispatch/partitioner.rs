use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::model::PartitionContext;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Produces one execution context per partition
#[derive(Debug, Clone, Default)]
pub struct DynamicPartitioner {
    job_base_dir: Option<PathBuf>,
}

impl DynamicPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_job_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.job_base_dir = Some(dir.into());
    }

    pub fn job_base_dir(&self) -> Option<&Path> {
        self.job_base_dir.as_deref()
    }

    /// Contexts for `partition0..partition{grid_size-1}`
    pub fn partition(&self, grid_size: i64) -> BatchResult<Vec<PartitionContext>> {
        if grid_size < 0 {
            return Err(BatchError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("Grid size must not be negative, got {}", grid_size),
            ));
        }
        if self.job_base_dir.is_none() {
            warn!("Creating partition contexts without a job base directory");
        }

        let contexts: Vec<PartitionContext> = (0..grid_size as usize)
            .map(|index| PartitionContext::new(index, self.job_base_dir.clone()))
            .collect();
        debug!("Created {} partition contexts", contexts.len());
        Ok(contexts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_carry_base_dir() {
        let mut partitioner = DynamicPartitioner::new();
        partitioner.set_job_base_dir("/jobs/a");
        let contexts = partitioner.partition(3).unwrap();
        assert_eq!(contexts.len(), 3);
        assert_eq!(contexts[2].name, "partition2");
        assert_eq!(contexts[0].job_base_dir.as_deref(), Some(Path::new("/jobs/a")));
    }

    #[test]
    fn test_zero_and_negative_grid() {
        let partitioner = DynamicPartitioner::new();
        assert!(partitioner.partition(0).unwrap().is_empty());
        let err = partitioner.partition(-1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_VALUE);
    }
}
