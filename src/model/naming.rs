//! Naming conventions for job folders, partition directories and files

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;

pub const PARTITION_PREFIX: &str = "partition";
pub const INPUT_PREFIX: &str = "input";
pub const OUTPUT_PREFIX: &str = "output";

pub const JOB_FOLDER_PREFIX: &str = "forest-batch-job";

pub const POLYGON_FILE_NAME: &str = "polygons.csv";
pub const LAYER_FILE_NAME: &str = "layers.csv";
pub const YIELD_TABLE_FILE_NAME: &str = "YieldTable.csv";
pub const README_FILE_NAME: &str = "README.txt";

/// Matches `input-partition{N}` and `output-partition{N}` directory names
static PARTITION_DIR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(input|output)-partition(\d+)$").expect("Valid regex pattern")
});

pub fn partition_name(index: usize) -> String {
    format!("{PARTITION_PREFIX}{index}")
}

/// `partition3` -> `input-partition3`
pub fn input_partition_dir_name(partition_name: &str) -> String {
    format!("{INPUT_PREFIX}-{partition_name}")
}

/// `partition3` -> `output-partition3`
pub fn output_partition_dir_name(partition_name: &str) -> String {
    format!("{OUTPUT_PREFIX}-{partition_name}")
}

/// Which side of the pipeline a partition directory belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionDirKind {
    Input,
    Output,
}

/// Parse a partition directory name into its kind and index
pub fn parse_partition_dir_name(name: &str) -> Option<(PartitionDirKind, usize)> {
    let captures = PARTITION_DIR_PATTERN.captures(name)?;
    let kind = match captures.get(1)?.as_str() {
        INPUT_PREFIX => PartitionDirKind::Input,
        _ => PartitionDirKind::Output,
    };
    let index = captures.get(2)?.as_str().parse().ok()?;
    Some((kind, index))
}

/// Job working folder name: `{prefix}-{guid}`
pub fn job_folder_name(prefix: &str, guid: &str) -> String {
    format!("{prefix}-{guid}")
}

pub fn new_job_guid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Timestamp safe for use in file names, e.g. `2025_10_02_14_06_43_4933`
pub fn format_job_timestamp(at: DateTime<Local>) -> String {
    let fraction = at.timestamp_subsec_micros() / 100;
    format!("{}_{:04}", at.format("%Y_%m_%d_%H_%M_%S"), fraction)
}

pub fn job_timestamp() -> String {
    format_job_timestamp(Local::now())
}

/// Identifier handed to the projection service for one chunk
pub fn projection_id(job_execution_id: u64, partition_name: &str, kind: &str) -> String {
    format!(
        "batch-{job_execution_id}-{partition_name}-projection-{kind}-{}",
        job_timestamp()
    )
}
