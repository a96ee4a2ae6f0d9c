//! Error types for result aggregation

use std::path::PathBuf;

/// Error type for aggregation operations
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("Job base directory does not exist: {path}")]
    BaseDirMissing { path: PathBuf },

    #[error("Job base path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("{description} while walking {path}: {source}")]
    DirectoryWalk {
        path: PathBuf,
        description: String,
        source: walkdir::Error,
    },

    #[error("{description} while reading {path}: {source}")]
    FileRead {
        path: PathBuf,
        description: String,
        source: std::io::Error,
    },

    #[error("{description} while writing {path}: {source}")]
    FileWrite {
        path: PathBuf,
        description: String,
        source: std::io::Error,
    },

    #[error("{description} for archive {path}: {source}")]
    Archive {
        path: PathBuf,
        description: String,
        source: zip::result::ZipError,
    },

    #[error("Yield table numbering overflowed after {assigned} tables")]
    TableNumberOverflow { assigned: usize },
}

impl AggregationError {
    pub(crate) fn read(path: impl Into<PathBuf>, description: &str, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            description: description.to_string(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, description: &str, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            description: description.to_string(),
            source,
        }
    }

    pub(crate) fn archive(
        path: impl Into<PathBuf>,
        description: &str,
        source: zip::result::ZipError,
    ) -> Self {
        Self::Archive {
            path: path.into(),
            description: description.to_string(),
            source,
        }
    }

    /// Path the failure relates to, when there is one
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::BaseDirMissing { path }
            | Self::NotADirectory { path }
            | Self::DirectoryWalk { path, .. }
            | Self::FileRead { path, .. }
            | Self::FileWrite { path, .. }
            | Self::Archive { path, .. } => Some(path),
            Self::TableNumberOverflow { .. } => None,
        }
    }
}

/// Result type for aggregation operations
pub type AggregationResult<T> = Result<T, AggregationError>;
