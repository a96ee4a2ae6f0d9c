use super::error::{AggregationError, AggregationResult};
use super::logs::{self, LogType};
use super::yield_table::{self, YieldMergeStats};
use crate::config::AggregationConfig;
use crate::model::naming::{
    parse_partition_dir_name, PartitionDirKind, README_FILE_NAME, YIELD_TABLE_FILE_NAME,
};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Result files found under one `output-partition{N}` directory
#[derive(Debug, Default)]
struct PartitionFiles {
    yield_tables: Vec<PathBuf>,
    logs: Vec<PathBuf>,
}

/// Merges partition outputs into one archive and cleans up afterwards
#[derive(Debug, Clone)]
pub struct ResultAggregationService {
    min_valid_file_size: u64,
    archive_name_prefix: String,
}

impl Default for ResultAggregationService {
    fn default() -> Self {
        Self::from_config(&AggregationConfig::default())
    }
}

impl ResultAggregationService {
    pub fn new(min_valid_file_size: u64, archive_name_prefix: impl Into<String>) -> Self {
        Self {
            min_valid_file_size,
            archive_name_prefix: archive_name_prefix.into(),
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::new(config.min_valid_file_size, config.archive_name_prefix.clone())
    }

    /// Path of the consolidated archive for a job
    pub fn archive_path(&self, job_guid: &str, job_base_dir: &Path) -> PathBuf {
        job_base_dir.join(format!("{}-{}.zip", self.archive_name_prefix, job_guid))
    }

    /// Merge all partition outputs under `job_base_dir` into a ZIP archive
    ///
    /// Partitions are merged in ascending index order. When no partition
    /// output exists the archive holds only a README.
    pub fn aggregate(
        &self,
        job_execution_id: u64,
        job_guid: &str,
        job_base_dir: &Path,
        job_timestamp: &str,
    ) -> AggregationResult<PathBuf> {
        ensure_base_dir(job_base_dir)?;
        info!(
            "[GUID: {}, EXEID: {}] Starting result aggregation in {}",
            job_guid,
            job_execution_id,
            job_base_dir.display()
        );

        let partition_dirs = find_output_partition_dirs(job_base_dir)?;
        let zip_path = self.archive_path(job_guid, job_base_dir);
        let file = File::create(&zip_path)
            .map_err(|e| AggregationError::write(&zip_path, "Failed to create archive", e))?;
        let mut zip = ZipWriter::new(file);
        zip.set_comment(format!(
            "forest-batch job {} execution {} at {}",
            job_guid, job_execution_id, job_timestamp
        ));

        if partition_dirs.is_empty() {
            warn!(
                "[GUID: {}, EXEID: {}] No partition output directories found, writing empty result",
                job_guid, job_execution_id
            );
            write_readme(&mut zip, &zip_path, job_guid, job_execution_id, job_timestamp)?;
        } else {
            info!(
                "[GUID: {}, EXEID: {}] Found {} partition output directories",
                job_guid,
                job_execution_id,
                partition_dirs.len()
            );
            let mut yield_files = Vec::new();
            let mut log_files = Vec::new();
            for dir in &partition_dirs {
                match collect_partition_files(dir) {
                    Ok(files) => {
                        yield_files.extend(files.yield_tables);
                        log_files.extend(files.logs);
                    }
                    Err(e) => warn!(
                        "[GUID: {}, EXEID: {}] Partition output skipped: {}",
                        job_guid, job_execution_id, e
                    ),
                }
            }

            if !yield_files.is_empty() {
                let stats = self.write_yield_table(&mut zip, &zip_path, &yield_files)?;
                info!(
                    "[GUID: {}, EXEID: {}] Yield table: {} rows from {} files, {} tables",
                    job_guid, job_execution_id, stats.rows, stats.files, stats.unique_tables
                );
            }
            write_merged_logs(&mut zip, &zip_path, log_files)?;
        }

        zip.finish()
            .map_err(|e| AggregationError::archive(&zip_path, "Failed to finalize archive", e))?;

        info!(
            "[GUID: {}, EXEID: {}] Result aggregation complete: {}",
            job_guid,
            job_execution_id,
            zip_path.display()
        );
        Ok(zip_path)
    }

    fn write_yield_table(
        &self,
        zip: &mut ZipWriter<File>,
        zip_path: &Path,
        files: &[PathBuf],
    ) -> AggregationResult<YieldMergeStats> {
        zip.start_file(YIELD_TABLE_FILE_NAME, entry_options())
            .map_err(|e| AggregationError::archive(zip_path, "Failed to add yield table", e))?;
        yield_table::merge_yield_tables(files, self.min_valid_file_size, zip, zip_path)
    }

    /// True when `zip_path` is a readable, non-empty archive with a yield table
    pub fn validate_consolidated_zip(&self, zip_path: &Path) -> bool {
        match fs::metadata(zip_path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            Ok(_) => {
                warn!("Consolidated archive is empty or not a file: {}", zip_path.display());
                return false;
            }
            Err(e) => {
                warn!("Consolidated archive {} is not accessible: {}", zip_path.display(), e);
                return false;
            }
        }

        let archive = File::open(zip_path)
            .map_err(zip::result::ZipError::Io)
            .and_then(ZipArchive::new);
        let mut archive = match archive {
            Ok(archive) => archive,
            Err(e) => {
                warn!("Consolidated archive {} is unreadable: {}", zip_path.display(), e);
                return false;
            }
        };

        let has_yield_table = archive.by_name(YIELD_TABLE_FILE_NAME).is_ok();
        if !has_yield_table {
            warn!(
                "Consolidated archive {} has no {} entry",
                zip_path.display(),
                YIELD_TABLE_FILE_NAME
            );
        }
        has_yield_table
    }

    /// Remove `input-partition{N}` and `output-partition{N}` directories
    ///
    /// Other entries are left alone. Returns the number of directories removed.
    pub fn cleanup_partition_directories(&self, job_base_dir: &Path) -> usize {
        match fs::metadata(job_base_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                debug!("Cleanup skipped, {} is not a directory", job_base_dir.display());
                return 0;
            }
            Err(_) => {
                debug!("Cleanup skipped, {} does not exist", job_base_dir.display());
                return 0;
            }
        }

        let mut removed = 0;
        for entry in WalkDir::new(job_base_dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to list {} during cleanup: {}", job_base_dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if parse_partition_dir_name(&name).is_none() {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!("Removed partition directory {}", entry.path().display());
                    removed += 1;
                }
                Err(e) => warn!(
                    "Failed to remove partition directory {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
        info!(
            "Removed {} partition directories from {}",
            removed,
            job_base_dir.display()
        );
        removed
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn ensure_base_dir(job_base_dir: &Path) -> AggregationResult<()> {
    match fs::metadata(job_base_dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(AggregationError::NotADirectory {
            path: job_base_dir.to_path_buf(),
        }),
        Err(_) => Err(AggregationError::BaseDirMissing {
            path: job_base_dir.to_path_buf(),
        }),
    }
}

/// `output-partition{N}` directories directly under `job_base_dir`, by index
fn find_output_partition_dirs(job_base_dir: &Path) -> AggregationResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(job_base_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| AggregationError::DirectoryWalk {
            path: job_base_dir.to_path_buf(),
            description: "Failed to list partition directories".to_string(),
            source: e,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some((PartitionDirKind::Output, index)) =
            parse_partition_dir_name(&entry.file_name().to_string_lossy())
        {
            dirs.push((index, entry.into_path()));
        }
    }
    dirs.sort_by_key(|(index, _)| *index);
    Ok(dirs.into_iter().map(|(_, path)| path).collect())
}

fn collect_partition_files(dir: &Path) -> AggregationResult<PartitionFiles> {
    let mut files = PartitionFiles::default();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| AggregationError::DirectoryWalk {
            path: dir.to_path_buf(),
            description: "Failed to collect partition files".to_string(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if yield_table::is_yield_table_file(&name) {
            files.yield_tables.push(entry.into_path());
        } else if logs::is_log_file(&name) {
            files.logs.push(entry.into_path());
        }
    }
    Ok(files)
}

fn write_merged_logs(
    zip: &mut ZipWriter<File>,
    zip_path: &Path,
    log_files: Vec<PathBuf>,
) -> AggregationResult<()> {
    for (log_type, files) in logs::group_by_type(log_files) {
        let entry_name = log_type.merged_file_name();
        zip.start_file(entry_name.as_str(), entry_options())
            .map_err(|e| AggregationError::archive(zip_path, "Failed to add merged log", e))?;
        let stats = logs::merge_logs(log_type, &files, zip)
            .map_err(|e| AggregationError::write(zip_path, "Failed to write merged log", e))?;
        if log_type == LogType::Error && stats.merged > 0 {
            info!("Merged {} error logs into {}", stats.merged, entry_name);
        }
    }
    Ok(())
}

fn write_readme(
    zip: &mut ZipWriter<File>,
    zip_path: &Path,
    job_guid: &str,
    job_execution_id: u64,
    job_timestamp: &str,
) -> AggregationResult<()> {
    zip.start_file(README_FILE_NAME, entry_options())
        .map_err(|e| AggregationError::archive(zip_path, "Failed to add README", e))?;
    let text = format!(
        "No results were generated for job {} (execution {}, {}).\n\
         No partition produced an output directory.\n",
        job_guid, job_execution_id, job_timestamp
    );
    zip.write_all(text.as_bytes())
        .map_err(|e| AggregationError::write(zip_path, "Failed to write README", e))
}
