//! Merge of per-partition log files by log type

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Log family, inferred from the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogType {
    Error,
    Progress,
    Debug,
    General,
}

impl LogType {
    pub fn from_file_name(file_name: &str) -> Self {
        let lower = file_name.to_ascii_lowercase();
        if lower.contains("error") {
            Self::Error
        } else if lower.contains("progress") {
            Self::Progress
        } else if lower.contains("debug") {
            Self::Debug
        } else {
            Self::General
        }
    }

    /// Entry name of the merged log inside the archive
    pub fn merged_file_name(self) -> String {
        format!("{}Log.txt", self)
    }

    /// Error logs are concatenated as-is; others get a blank line between files
    fn separates_files(self) -> bool {
        self != Self::Error
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "Error",
            Self::Progress => "Progress",
            Self::Debug => "Debug",
            Self::General => "General",
        };
        f.write_str(name)
    }
}

pub fn is_log_file(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    ["log", "error", "progress", "debug"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Group log files by type, preserving the given order within each group
pub fn group_by_type(files: Vec<PathBuf>) -> BTreeMap<LogType, Vec<PathBuf>> {
    let mut groups: BTreeMap<LogType, Vec<PathBuf>> = BTreeMap::new();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        groups.entry(LogType::from_file_name(&name)).or_default().push(path);
    }
    groups
}

/// Outcome of merging one log group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogMergeStats {
    pub merged: usize,
    pub failed: usize,
}

/// Concatenate `files` into `out`
///
/// A file that cannot be read is counted and skipped; only a failure to
/// write to `out` aborts the merge.
pub fn merge_logs<W: Write>(
    log_type: LogType,
    files: &[PathBuf],
    out: &mut W,
) -> std::io::Result<LogMergeStats> {
    let mut stats = LogMergeStats::default();
    for path in files {
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to merge {} log {}: {}", log_type, path.display(), e);
                stats.failed += 1;
                continue;
            }
        };
        out.write_all(&content)?;
        if log_type.separates_files() {
            out.write_all(b"\n")?;
        }
        stats.merged += 1;
    }

    if stats.failed > 0 {
        warn!(
            "Merged {} {} log files ({} failed)",
            stats.merged, log_type, stats.failed
        );
    } else {
        debug!("Merged {} {} log files", stats.merged, log_type);
    }
    Ok(stats)
}
