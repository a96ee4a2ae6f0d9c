//! Yield-table merge with global table renumbering

use super::error::{AggregationError, AggregationResult};
use crate::partition::csv_line::{is_blank, is_header_line, split_fields};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FEATURE_ID_COLUMN: usize = 1;
const LAYER_ID_COLUMN: usize = 5;

/// True for yield-table result files, excluding logs
pub fn is_yield_table_file(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().contains("yield") && !super::logs::is_log_file(file_name)
}

/// Assigns global table numbers keyed by (feature id, layer id)
///
/// Numbers start at 1 and follow first-seen order.
#[derive(Debug, Default)]
pub struct TableNumberAssigner {
    assigned: HashMap<String, u32>,
    next: u32,
}

impl TableNumberAssigner {
    pub fn new() -> Self {
        Self {
            assigned: HashMap::new(),
            next: 1,
        }
    }

    pub fn unique_count(&self) -> usize {
        self.assigned.len()
    }

    /// Rewrite the leading table number of a data row
    ///
    /// Rows without a feature id yield `None` and are dropped. Rows too
    /// short to carry a layer id are passed through unchanged.
    pub fn assign(&mut self, line: &str) -> AggregationResult<Option<String>> {
        if is_blank(line) {
            return Ok(Some(line.to_string()));
        }
        let Some(first_comma) = line.find(',') else {
            return Ok(Some(line.to_string()));
        };
        let Some(fields) = split_fields(line) else {
            return Ok(Some(line.to_string()));
        };

        let feature_id = fields.get(FEATURE_ID_COLUMN).unwrap_or_default();
        if fields.len() <= FEATURE_ID_COLUMN {
            return Ok(Some(line.to_string()));
        }
        if feature_id.is_empty() {
            warn!("Skipping yield row with missing FEATURE_ID: {}", line);
            return Ok(None);
        }
        let Some(layer_id) = fields.get(LAYER_ID_COLUMN) else {
            return Ok(Some(line.to_string()));
        };

        let key = format!("{}_{}", feature_id, layer_id);
        let table_num = match self.assigned.get(&key) {
            Some(n) => *n,
            None => {
                if self.next == u32::MAX {
                    return Err(AggregationError::TableNumberOverflow {
                        assigned: self.assigned.len(),
                    });
                }
                let n = self.next;
                self.next += 1;
                self.assigned.insert(key, n);
                n
            }
        };
        Ok(Some(format!("{}{}", table_num, &line[first_comma..])))
    }
}

/// Header chosen for the merged table
///
/// The first file supplies it when its first line is a header. Otherwise
/// later files at least `min_valid_file_size` bytes long are scanned for
/// one. `None` means the merged table is written without a header.
pub fn select_header(files: &[PathBuf], min_valid_file_size: u64) -> Option<String> {
    let (first, rest) = files.split_first()?;
    if let Some(header) = first_line_header(first) {
        return Some(header);
    }

    info!("First yield table has no header, searching later partitions");
    for file in rest {
        let size = match fs::metadata(file) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Failed to get size of file {}: {}", file.display(), e);
                continue;
            }
        };
        if size < min_valid_file_size {
            debug!(
                "Skipping {} for header recovery ({} bytes < {})",
                file.display(),
                size,
                min_valid_file_size
            );
            continue;
        }
        if let Some(header) = first_line_header(file) {
            info!("Recovered yield table header from {}", file.display());
            return Some(header);
        }
    }
    warn!("No valid header found in any partition; merged yield table has no header");
    None
}

fn first_line_header(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let first = BufReader::new(file).lines().next()?.ok()?;
    (!is_blank(&first) && is_header_line(&first)).then_some(first)
}

/// Counts from one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YieldMergeStats {
    pub files: usize,
    /// Files that could not be read and were left out
    pub failed_files: usize,
    pub rows: usize,
    pub unique_tables: usize,
    pub header: Option<String>,
}

/// Merge `files`, in order, into `out`
pub fn merge_yield_tables<W: Write>(
    files: &[PathBuf],
    min_valid_file_size: u64,
    out: &mut W,
    out_path: &Path,
) -> AggregationResult<YieldMergeStats> {
    let header = select_header(files, min_valid_file_size);
    if let Some(h) = &header {
        writeln!(out, "{}", h)
            .map_err(|e| AggregationError::write(out_path, "Failed to write yield table header", e))?;
    }

    let mut assigner = TableNumberAssigner::new();
    let mut rows = 0usize;

    let mut failed_files = 0usize;
    for path in files {
        match merge_one(path, &mut assigner, out, out_path) {
            Ok(n) => rows += n,
            Err(e @ (AggregationError::FileWrite { .. } | AggregationError::TableNumberOverflow { .. })) => {
                return Err(e)
            }
            Err(e) => {
                warn!("Yield table file skipped: {}", e);
                failed_files += 1;
            }
        }
    }

    info!(
        "Merged {} files into yield table with {} rows and {} unique polygon/layer combinations",
        files.len(),
        rows,
        assigner.unique_count()
    );

    Ok(YieldMergeStats {
        files: files.len(),
        failed_files,
        rows,
        unique_tables: assigner.unique_count(),
        header,
    })
}

/// Append the data rows of one partition file; returns rows written
fn merge_one<W: Write>(
    path: &Path,
    assigner: &mut TableNumberAssigner,
    out: &mut W,
    out_path: &Path,
) -> AggregationResult<usize> {
    let file =
        File::open(path).map_err(|e| AggregationError::read(path, "Error opening yield table", e))?;
    let mut rows = 0;
    let mut first = true;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| AggregationError::read(path, "Error reading yield table", e))?;
        if is_blank(&line) {
            continue;
        }
        if first {
            first = false;
            if is_header_line(&line) {
                continue;
            }
        }
        if let Some(renumbered) = assigner.assign(&line)? {
            writeln!(out, "{}", renumbered)
                .map_err(|e| AggregationError::write(out_path, "Failed to write yield table row", e))?;
            rows += 1;
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "TABLE_NUM,FEATURE_ID,DISTRICT,MAP_ID,POLYGON_ID,LAYER_ID,PRJ_TOTAL_AGE";

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn merge(files: &[PathBuf], min: u64) -> (String, YieldMergeStats) {
        let mut out = Vec::new();
        let stats = merge_yield_tables(files, min, &mut out, Path::new("YieldTable.csv")).unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    #[test]
    fn test_assigner_is_keyed_by_feature_and_layer() {
        let mut assigner = TableNumberAssigner::new();
        assert_eq!(assigner.assign("7,100,D,M,P,1,10").unwrap().unwrap(), "1,100,D,M,P,1,10");
        assert_eq!(assigner.assign("7,100,D,M,P,1,20").unwrap().unwrap(), "1,100,D,M,P,1,20");
        assert_eq!(assigner.assign("7,100,D,M,P,2,10").unwrap().unwrap(), "2,100,D,M,P,2,10");
        assert_eq!(assigner.assign("1,200,D,M,P,1,10").unwrap().unwrap(), "3,200,D,M,P,1,10");
        assert_eq!(assigner.unique_count(), 3);
    }

    #[test]
    fn test_assigner_edge_rows() {
        let mut assigner = TableNumberAssigner::new();
        assert!(assigner.assign("1,,D,M,P,1").unwrap().is_none());
        assert_eq!(assigner.assign("no commas").unwrap().unwrap(), "no commas");
        assert_eq!(assigner.assign("1,100,D").unwrap().unwrap(), "1,100,D");
        assert_eq!(assigner.unique_count(), 0);
    }

    #[test]
    fn test_local_numbers_are_renumbered_in_partition_order() {
        let temp = TempDir::new().unwrap();
        let a = write(temp.path(), "a.csv", &format!("{HEADER}\n1,100,D,M,P,1,10\n"));
        let b = write(temp.path(), "b.csv", &format!("{HEADER}\n1,200,D,M,P,1,10\n"));

        let (merged, stats) = merge(&[a, b], 64);
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines, [HEADER, "1,100,D,M,P,1,10", "2,200,D,M,P,1,10"]);
        assert_eq!(stats.unique_tables, 2);
    }

    #[test]
    fn test_header_recovered_from_later_partition() {
        let temp = TempDir::new().unwrap();
        let empty = write(temp.path(), "a.csv", "");
        let full = write(
            temp.path(),
            "b.csv",
            &format!("{HEADER}\n1,200,D,M,P,1,10\n1,200,D,M,P,1,20\n"),
        );

        let (merged, stats) = merge(&[empty, full], 64);
        assert_eq!(merged.lines().next(), Some(HEADER));
        assert_eq!(merged.lines().count(), 3);
        assert_eq!(stats.header.as_deref(), Some(HEADER));
    }

    #[test]
    fn test_small_files_are_not_header_sources() {
        let temp = TempDir::new().unwrap();
        let headerless = write(temp.path(), "a.csv", "1,100,D,M,P,1,10\n");
        let tiny = write(temp.path(), "b.csv", "TABLE_NUM,FEATURE_ID\n");

        let (merged, stats) = merge(&[headerless, tiny], 64);
        assert!(stats.header.is_none());
        assert_eq!(merged, "1,100,D,M,P,1,10\n");
    }

    #[test]
    fn test_unreadable_file_does_not_abort_merge() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone.csv");
        let good = write(temp.path(), "b.csv", &format!("{HEADER}\n1,200,D,M,P,1,10\n"));

        let (merged, stats) = merge(&[good, missing], 64);
        assert_eq!(stats.failed_files, 1);
        assert_eq!(stats.rows, 1);
        assert!(merged.ends_with("1,200,D,M,P,1,10\n"));
    }

    #[test]
    fn test_yield_table_file_names() {
        assert!(is_yield_table_file("YieldTable.csv"));
        assert!(is_yield_table_file("YieldTables_batch-1_yield.csv"));
        assert!(!is_yield_table_file("YieldTables_batch-1_ErrorLog.txt"));
        assert!(!is_yield_table_file("polygons.csv"));
    }
}
