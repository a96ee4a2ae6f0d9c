//! Per-partition result store under `output-partitionN`

use crate::error::{BatchResult, ErrorExt};
use crate::model::naming::{output_partition_dir_name, YIELD_TABLE_FILE_NAME};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Log streams a projection may produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Error,
    Progress,
    Debug,
}

impl LogKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            LogKind::Error => "ErrorLog.log",
            LogKind::Progress => "ProgressLog.log",
            LogKind::Debug => "DebugLog.log",
        }
    }
}

/// Append-only writer for one partition's results
///
/// The directory is created on first write.
#[derive(Debug, Clone)]
pub struct PartitionOutput {
    dir: PathBuf,
}

impl PartitionOutput {
    pub fn new(job_base_dir: &Path, partition_name: &str) -> Self {
        Self {
            dir: job_base_dir.join(output_partition_dir_name(partition_name)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn yield_table_path(&self) -> PathBuf {
        self.dir.join(YIELD_TABLE_FILE_NAME)
    }

    pub fn log_path(&self, kind: LogKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    async fn ensure_dir(&self) -> BatchResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .to_storage_error(&self.dir, "Failed to create partition output directory")
    }

    async fn append(&self, path: &Path, text: &str) -> BatchResult<()> {
        self.ensure_dir().await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .to_storage_error(path, "Failed to open result file")?;
        file.write_all(text.as_bytes())
            .await
            .to_storage_error(path, "Failed to append to result file")?;
        file.flush()
            .await
            .to_storage_error(path, "Failed to flush result file")
    }

    /// Append yield rows; `header` is written only when the file is new
    pub async fn append_yield_rows(&self, header: &str, rows: &[String]) -> BatchResult<()> {
        let path = self.yield_table_path();
        let is_new = !fs::try_exists(&path).await.unwrap_or(false);
        let mut text = String::new();
        if is_new {
            text.push_str(header);
            text.push('\n');
        }
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        self.append(&path, &text).await
    }

    pub async fn append_log(&self, kind: LogKind, text: &str) -> BatchResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        let mut owned = text.to_string();
        if !owned.ends_with('\n') {
            owned.push('\n');
        }
        self.append(&self.log_path(kind), &owned).await
    }
}
