use super::{BatchError, BoxError, ErrorCode};
use std::path::Path;

/// Extension trait for annotating foreign errors at component boundaries
pub trait ErrorExt<T> {
    /// Convert to a configuration error
    fn to_config_error(self, message: impl Into<String>) -> Result<T, BatchError>;

    /// Convert to a data read error for the given partition and path
    fn to_read_error(self, partition: &str, path: &Path) -> Result<T, BatchError>;

    /// Convert to a result storage error for the given path
    fn to_storage_error(self, path: &Path, message: impl Into<String>) -> Result<T, BatchError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn to_config_error(self, message: impl Into<String>) -> Result<T, BatchError> {
        self.map_err(|e| BatchError::config(message).with_source(e))
    }

    fn to_read_error(self, partition: &str, path: &Path) -> Result<T, BatchError> {
        self.map_err(|e| {
            BatchError::data_read(
                ErrorCode::READ_IO_ERROR,
                partition,
                format!("Failed to read {}", path.display()),
                Some(path.to_path_buf()),
            )
            .with_source(e)
        })
    }

    fn to_storage_error(self, path: &Path, message: impl Into<String>) -> Result<T, BatchError> {
        self.map_err(|e| BatchError::storage(Some(path.to_path_buf()), message).with_source(e))
    }
}
