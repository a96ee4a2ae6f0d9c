//! Balanced splitting of a polygon/layer CSV pair into partition directories

use super::csv_line::{is_blank, parse_feature_id};
use crate::error::{BatchError, BatchResult, ErrorCode};
use crate::model::naming::{
    input_partition_dir_name, partition_name, LAYER_FILE_NAME, POLYGON_FILE_NAME,
};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A CSV input that can be streamed more than once
pub trait CsvSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send + '_>>;

    /// Short description used in error messages
    fn describe(&self) -> String;
}

impl<T: CsvSource + ?Sized> CsvSource for &T {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send + '_>> {
        (**self).open()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl CsvSource for Path {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send + '_>> {
        Ok(Box::new(BufReader::new(File::open(self)?)))
    }

    fn describe(&self) -> String {
        self.display().to_string()
    }
}

impl CsvSource for PathBuf {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send + '_>> {
        self.as_path().open()
    }

    fn describe(&self) -> String {
        self.as_path().describe()
    }
}

impl CsvSource for [u8] {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send + '_>> {
        Ok(Box::new(Cursor::new(self)))
    }

    fn describe(&self) -> String {
        format!("<in-memory, {} bytes>", self.len())
    }
}

impl CsvSource for Vec<u8> {
    fn open(&self) -> io::Result<Box<dyn BufRead + Send + '_>> {
        self.as_slice().open()
    }

    fn describe(&self) -> String {
        self.as_slice().describe()
    }
}

/// Outcome of a partitioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub total_feature_ids: usize,
    /// Feature ids assigned to each partition, by index
    pub feature_ids_per_partition: Vec<usize>,
    pub polygon_rows_written: usize,
    pub layer_rows_written: usize,
    /// Layer rows whose feature id has no owning partition
    pub layer_rows_dropped: usize,
}

/// Splits polygon and layer CSV streams into `input-partition{N}` directories
#[derive(Debug, Clone, Default)]
pub struct InputPartitioner;

impl InputPartitioner {
    pub fn new() -> Self {
        Self
    }

    /// Partition the inputs and return the number of distinct feature ids
    pub fn partition<P, L>(
        &self,
        polygons: &P,
        layers: &L,
        partition_count: usize,
        output_dir: &Path,
        job_guid: &str,
    ) -> BatchResult<usize>
    where
        P: CsvSource + ?Sized,
        L: CsvSource + ?Sized,
    {
        self.partition_with_summary(polygons, layers, partition_count, output_dir, job_guid)
            .map(|summary| summary.total_feature_ids)
    }

    pub fn partition_with_summary<P, L>(
        &self,
        polygons: &P,
        layers: &L,
        partition_count: usize,
        output_dir: &Path,
        job_guid: &str,
    ) -> BatchResult<PartitionSummary>
    where
        P: CsvSource + ?Sized,
        L: CsvSource + ?Sized,
    {
        if partition_count == 0 {
            return Err(BatchError::partitioning(
                ErrorCode::PARTITION_INVALID_COUNT,
                job_guid,
                "Partition count must be positive, got: 0",
                None,
            ));
        }

        let scan = scan_feature_ids(polygons, job_guid)?;
        if scan.feature_ids.is_empty() {
            return Err(BatchError::partitioning(
                ErrorCode::PARTITION_NO_FEATURE_IDS,
                job_guid,
                format!("No valid feature ids found in {}", polygons.describe()),
                None,
            ));
        }

        let sizes = balanced_sizes(scan.feature_ids.len(), partition_count);
        info!(
            "[GUID: {}] Total feature ids: {}, partitions: {}, partition sizes: {:?}",
            job_guid,
            scan.feature_ids.len(),
            partition_count,
            sizes
        );
        let owner = assign_partitions(&scan.feature_ids, &sizes);

        let polygon_rows_written = write_polygon_partitions(
            polygons,
            scan.header.as_deref(),
            &owner,
            partition_count,
            output_dir,
            job_guid,
        )?;
        let (layer_rows_written, layer_rows_dropped) =
            write_layer_partitions(layers, &owner, partition_count, output_dir, job_guid)?;

        info!(
            "[GUID: {}] Partitioned {} feature ids ({} polygon rows, {} layer rows, {} layer rows dropped)",
            job_guid,
            scan.feature_ids.len(),
            polygon_rows_written,
            layer_rows_written,
            layer_rows_dropped
        );

        Ok(PartitionSummary {
            total_feature_ids: scan.feature_ids.len(),
            feature_ids_per_partition: sizes,
            polygon_rows_written,
            layer_rows_written,
            layer_rows_dropped,
        })
    }
}

struct FeatureScan {
    header: Option<String>,
    feature_ids: Vec<String>,
}

/// Sizes for `count` ids over `partitions` buckets; the first
/// `count % partitions` buckets get one extra
pub fn balanced_sizes(count: usize, partitions: usize) -> Vec<usize> {
    if partitions == 0 {
        return Vec::new();
    }
    let base = count / partitions;
    let remainder = count % partitions;
    (0..partitions)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Map each feature id to its partition, preserving input order
fn assign_partitions(feature_ids: &[String], sizes: &[usize]) -> HashMap<String, usize> {
    let mut owner = HashMap::with_capacity(feature_ids.len());
    let mut ids = feature_ids.iter();
    for (partition, size) in sizes.iter().enumerate() {
        for id in ids.by_ref().take(*size) {
            owner.insert(id.clone(), partition);
        }
    }
    owner
}

fn io_failure(job_guid: &str, path: &Path, what: &str, err: io::Error) -> BatchError {
    BatchError::partitioning(
        ErrorCode::PARTITION_IO_ERROR,
        job_guid,
        format!("{what}: {}", path.display()),
        Some(path.to_path_buf()),
    )
    .with_source(err)
}

fn source_failure<S: CsvSource + ?Sized>(job_guid: &str, source: &S, err: io::Error) -> BatchError {
    BatchError::partitioning(
        ErrorCode::PARTITION_IO_ERROR,
        job_guid,
        format!("Failed to read {}", source.describe()),
        None,
    )
    .with_source(err)
}

/// Yields the non-blank lines of a source, flagging the first one
fn for_each_line<S, F>(source: &S, job_guid: &str, mut f: F) -> BatchResult<()>
where
    S: CsvSource + ?Sized,
    F: FnMut(bool, String) -> BatchResult<()>,
{
    let reader = source.open().map_err(|e| source_failure(job_guid, source, e))?;
    let mut first = true;
    for line in reader.lines() {
        let line = line.map_err(|e| source_failure(job_guid, source, e))?;
        if is_blank(&line) {
            continue;
        }
        f(first, line)?;
        first = false;
    }
    Ok(())
}

fn scan_feature_ids<S: CsvSource + ?Sized>(source: &S, job_guid: &str) -> BatchResult<FeatureScan> {
    let mut header = None;
    let mut seen = HashSet::new();
    let mut feature_ids = Vec::new();

    for_each_line(source, job_guid, |first, line| {
        match parse_feature_id(&line) {
            Some(id) => {
                if seen.insert(id.clone()) {
                    feature_ids.push(id);
                }
            }
            None if first => header = Some(line),
            None => debug!("[GUID: {}] Dropping polygon row without a feature id: {}", job_guid, line),
        }
        Ok(())
    })?;

    Ok(FeatureScan {
        header,
        feature_ids,
    })
}

/// One buffered writer per partition for a given file name
struct PartitionWriters {
    paths: Vec<PathBuf>,
    writers: Vec<BufWriter<File>>,
}

impl PartitionWriters {
    fn create(
        output_dir: &Path,
        file_name: &str,
        partition_count: usize,
        job_guid: &str,
    ) -> BatchResult<Self> {
        let mut paths = Vec::with_capacity(partition_count);
        let mut writers = Vec::with_capacity(partition_count);
        for index in 0..partition_count {
            let dir = output_dir.join(input_partition_dir_name(&partition_name(index)));
            fs::create_dir_all(&dir)
                .map_err(|e| io_failure(job_guid, &dir, "Failed to create partition directory", e))?;
            let path = dir.join(file_name);
            let file = File::create(&path)
                .map_err(|e| io_failure(job_guid, &path, "Failed to create partition file", e))?;
            writers.push(BufWriter::new(file));
            paths.push(path);
        }
        Ok(Self { paths, writers })
    }

    fn write_line(&mut self, partition: usize, line: &str, job_guid: &str) -> BatchResult<()> {
        let path = &self.paths[partition];
        writeln!(self.writers[partition], "{line}")
            .map_err(|e| io_failure(job_guid, path, "Failed to write partition file", e))
    }

    fn write_all(&mut self, line: &str, job_guid: &str) -> BatchResult<()> {
        for partition in 0..self.writers.len() {
            self.write_line(partition, line, job_guid)?;
        }
        Ok(())
    }

    fn finish(mut self, job_guid: &str) -> BatchResult<()> {
        for (writer, path) in self.writers.iter_mut().zip(&self.paths) {
            writer
                .flush()
                .map_err(|e| io_failure(job_guid, path, "Failed to flush partition file", e))?;
        }
        Ok(())
    }
}

fn write_polygon_partitions<S: CsvSource + ?Sized>(
    source: &S,
    header: Option<&str>,
    owner: &HashMap<String, usize>,
    partition_count: usize,
    output_dir: &Path,
    job_guid: &str,
) -> BatchResult<usize> {
    let mut writers = PartitionWriters::create(output_dir, POLYGON_FILE_NAME, partition_count, job_guid)?;
    if let Some(header) = header {
        writers.write_all(header, job_guid)?;
    }

    let mut written = 0;
    for_each_line(source, job_guid, |first, line| {
        if first && header.is_some() {
            return Ok(());
        }
        if let Some(partition) = parse_feature_id(&line).and_then(|id| owner.get(&id).copied()) {
            writers.write_line(partition, &line, job_guid)?;
            written += 1;
        }
        Ok(())
    })?;

    writers.finish(job_guid)?;
    Ok(written)
}

fn write_layer_partitions<S: CsvSource + ?Sized>(
    source: &S,
    owner: &HashMap<String, usize>,
    partition_count: usize,
    output_dir: &Path,
    job_guid: &str,
) -> BatchResult<(usize, usize)> {
    let mut writers = PartitionWriters::create(output_dir, LAYER_FILE_NAME, partition_count, job_guid)?;

    let mut written = 0;
    let mut dropped = 0;
    for_each_line(source, job_guid, |first, line| {
        match parse_feature_id(&line) {
            Some(id) => match owner.get(&id) {
                Some(partition) => {
                    writers.write_line(*partition, &line, job_guid)?;
                    written += 1;
                }
                None => dropped += 1,
            },
            None if first => writers.write_all(&line, job_guid)?,
            None => dropped += 1,
        }
        Ok(())
    })?;

    writers.finish(job_guid)?;
    Ok((written, dropped))
}
