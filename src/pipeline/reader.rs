//! Chunk reader for one partition's input directory
//!
//! Polygon rows are streamed forward, one chunk per `read()`. Layer rows are
//! indexed by feature id on the first read (byte offsets only) and fetched
//! per chunk, so memory stays bounded by the chunk size plus the index.

use crate::error::{BatchError, BatchResult, ErrorCode, ErrorExt};
use crate::model::naming::{input_partition_dir_name, LAYER_FILE_NAME, POLYGON_FILE_NAME};
use crate::model::{BatchRecord, ChunkMetadata};
use crate::partition::csv_line::{first_field, is_blank, parse_feature_id};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// One chunk of records, plus rows that could not be turned into records
#[derive(Debug)]
pub struct LoadedChunk {
    pub chunk: ChunkMetadata,
    pub records: Vec<BatchRecord>,
    /// Malformed rows, each one a skip candidate
    pub malformed: Vec<BatchError>,
}

/// A first non-blank line that is not a data row
fn is_header(line: &str) -> bool {
    parse_feature_id(line).is_none() && !first_field(line).unwrap_or_default().is_empty()
}

/// Read one line without its terminator; `None` at end of file
fn next_line<R: BufRead>(reader: &mut R, buf: &mut String) -> io::Result<Option<usize>> {
    buf.clear();
    let n = reader.read_line(buf)?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = buf.trim_end_matches(&['\n', '\r'][..]).len();
    buf.truncate(trimmed);
    Ok(Some(n))
}

#[derive(Debug)]
struct PolygonStream {
    reader: BufReader<File>,
    header: Option<String>,
    /// First data row, held back while probing for a header
    pending: Option<String>,
}

impl PolygonStream {
    fn open(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = None;
        let mut pending = None;
        let mut line = String::new();
        while next_line(&mut reader, &mut line)?.is_some() {
            if is_blank(&line) {
                continue;
            }
            if is_header(&line) {
                header = Some(line.clone());
            } else {
                pending = Some(line.clone());
            }
            break;
        }
        Ok(Self {
            reader,
            header,
            pending,
        })
    }

    fn next_row(&mut self) -> io::Result<Option<String>> {
        if let Some(row) = self.pending.take() {
            return Ok(Some(row));
        }
        let mut line = String::new();
        while next_line(&mut self.reader, &mut line)?.is_some() {
            if !is_blank(&line) {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

/// Byte offsets of the layer rows of every feature id in the partition
#[derive(Debug)]
struct LayerIndex {
    reader: BufReader<File>,
    header: Option<String>,
    offsets: HashMap<String, Vec<u64>>,
    position: u64,
}

impl LayerIndex {
    fn build(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = None;
        let mut offsets: HashMap<String, Vec<u64>> = HashMap::new();
        let mut position = 0u64;
        let mut first = true;
        let mut line = String::new();

        while let Some(n) = next_line(&mut reader, &mut line)? {
            let start = position;
            position += n as u64;
            if is_blank(&line) {
                continue;
            }
            if first {
                first = false;
                if is_header(&line) {
                    header = Some(line.clone());
                    continue;
                }
            }
            if let Some(id) = parse_feature_id(&line) {
                offsets.entry(id).or_default().push(start);
            }
        }

        Ok(Self {
            reader,
            header,
            offsets,
            position,
        })
    }

    /// Layer rows of `feature_ids`, in file order per id
    fn rows_for<'a, I>(&mut self, feature_ids: I) -> io::Result<HashMap<String, Vec<String>>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut wanted: Vec<(u64, &str)> = Vec::new();
        for id in feature_ids {
            if let Some(offsets) = self.offsets.get(id) {
                wanted.extend(offsets.iter().map(|offset| (*offset, id)));
            }
        }
        wanted.sort_unstable();
        wanted.dedup();

        let mut rows: HashMap<String, Vec<String>> = HashMap::new();
        let mut line = String::new();
        for (offset, id) in wanted {
            self.reader.seek_relative(offset as i64 - self.position as i64)?;
            let n = next_line(&mut self.reader, &mut line)?.unwrap_or(0);
            self.position = offset + n as u64;
            rows.entry(id.to_string()).or_default().push(line.clone());
        }
        Ok(rows)
    }
}

#[derive(Debug)]
struct OpenedInput {
    job_base_dir: PathBuf,
    polygon_path: PathBuf,
    layer_path: PathBuf,
    polygons: PolygonStream,
    /// Built on the first `read()`
    layers: Option<LayerIndex>,
    cursor: usize,
    exhausted: bool,
}

#[derive(Debug)]
enum ReaderState {
    Closed,
    Opened(Box<OpenedInput>),
    Failed { message: String, path: Option<PathBuf> },
}

pub struct PartitionReader {
    partition_name: String,
    job_guid: String,
    job_execution_id: u64,
    chunk_size: usize,
    state: ReaderState,
}

impl PartitionReader {
    pub fn new(
        partition_name: impl Into<String>,
        job_guid: impl Into<String>,
        job_execution_id: u64,
        chunk_size: usize,
    ) -> Self {
        Self {
            partition_name: partition_name.into(),
            job_guid: job_guid.into(),
            job_execution_id,
            chunk_size: chunk_size.max(1),
            state: ReaderState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ReaderState::Opened(_))
    }

    /// Open `input-partitionN` under `job_base_dir`
    ///
    /// A failure is remembered, and every later `read()` re-raises it.
    pub fn open(&mut self, job_base_dir: &Path) -> BatchResult<()> {
        debug!(
            "[GUID: {}, EXEID: {}, Partition: {}] Opening reader with chunk size {}",
            self.job_guid, self.job_execution_id, self.partition_name, self.chunk_size
        );

        match self.open_inputs(job_base_dir) {
            Ok(opened) => {
                self.state = ReaderState::Opened(Box::new(opened));
                Ok(())
            }
            Err(err) => {
                let path = match &err {
                    BatchError::DataRead { path, .. } => path.clone(),
                    _ => None,
                };
                self.state = ReaderState::Failed {
                    message: err.to_string(),
                    path,
                };
                Err(err)
            }
        }
    }

    fn open_inputs(&self, job_base_dir: &Path) -> BatchResult<OpenedInput> {
        if job_base_dir.as_os_str().is_empty() {
            return Err(BatchError::data_read(
                ErrorCode::READ_OPEN_FAILED,
                &self.partition_name,
                "job base directory is empty",
                None,
            ));
        }

        let partition_dir = job_base_dir.join(input_partition_dir_name(&self.partition_name));
        if !partition_dir.is_dir() {
            return Err(BatchError::data_read(
                ErrorCode::READ_OPEN_FAILED,
                &self.partition_name,
                "Partition directory does not exist",
                Some(partition_dir),
            ));
        }

        let polygon_path = partition_dir.join(POLYGON_FILE_NAME);
        let layer_path = partition_dir.join(LAYER_FILE_NAME);
        for path in [&polygon_path, &layer_path] {
            if !path.is_file() {
                return Err(BatchError::data_read(
                    ErrorCode::READ_MISSING_FILE,
                    &self.partition_name,
                    "Required partition input file is missing",
                    Some(path.clone()),
                ));
            }
        }

        let polygons =
            PolygonStream::open(&polygon_path).to_read_error(&self.partition_name, &polygon_path)?;

        Ok(OpenedInput {
            job_base_dir: job_base_dir.to_path_buf(),
            polygon_path,
            layer_path,
            polygons,
            layers: None,
            cursor: 0,
            exhausted: false,
        })
    }

    /// Next chunk of records, or `None` once the partition is exhausted
    ///
    /// An I/O error is returned once and ends the stream.
    pub fn read(&mut self) -> BatchResult<Option<LoadedChunk>> {
        let opened = match &mut self.state {
            ReaderState::Opened(opened) => opened,
            ReaderState::Closed => return Err(BatchError::reader_not_opened(&self.partition_name)),
            ReaderState::Failed { message, path } => {
                return Err(BatchError::data_read(
                    ErrorCode::READ_OPEN_FAILED,
                    &self.partition_name,
                    format!("Reader failed to open: {}", message),
                    path.clone(),
                ));
            }
        };

        if opened.exhausted {
            return Ok(None);
        }

        let result = load_next_chunk(opened, &self.partition_name, self.chunk_size);
        match &result {
            Ok(Some(loaded)) => trace!(
                "[GUID: {}, EXEID: {}, Partition: {}] Chunk {}..{} with {} records",
                self.job_guid,
                self.job_execution_id,
                self.partition_name,
                loaded.chunk.start_index,
                loaded.chunk.end_index(),
                loaded.records.len()
            ),
            Ok(None) => {
                opened.exhausted = true;
                trace!(
                    "[GUID: {}, EXEID: {}, Partition: {}] All {} records read",
                    self.job_guid, self.job_execution_id, self.partition_name, opened.cursor
                );
            }
            Err(e) => {
                opened.exhausted = true;
                warn!(
                    "[GUID: {}, EXEID: {}, Partition: {}] Input stream ended after {} records: {}",
                    self.job_guid, self.job_execution_id, self.partition_name, opened.cursor, e
                );
            }
        }
        result
    }

    /// Safe to call repeatedly, and on a reader that never opened
    pub fn close(&mut self) {
        if !matches!(self.state, ReaderState::Closed) {
            trace!(
                "[GUID: {}, EXEID: {}, Partition: {}] Closing reader",
                self.job_guid, self.job_execution_id, self.partition_name
            );
        }
        self.state = ReaderState::Closed;
    }
}

fn load_next_chunk(
    opened: &mut OpenedInput,
    partition: &str,
    chunk_size: usize,
) -> BatchResult<Option<LoadedChunk>> {
    if opened.layers.is_none() {
        let index = LayerIndex::build(&opened.layer_path).to_read_error(partition, &opened.layer_path)?;
        debug!(
            "[{}] Indexed layers of {} feature ids",
            partition,
            index.offsets.len()
        );
        opened.layers = Some(index);
    }

    let mut rows = Vec::with_capacity(chunk_size);
    while rows.len() < chunk_size {
        match opened
            .polygons
            .next_row()
            .to_read_error(partition, &opened.polygon_path)?
        {
            Some(row) => rows.push(row),
            None => break,
        }
    }
    if rows.is_empty() {
        return Ok(None);
    }

    let chunk = ChunkMetadata {
        partition_name: partition.to_string(),
        job_base_dir: opened.job_base_dir.clone(),
        start_index: opened.cursor,
        record_count: rows.len(),
    };
    opened.cursor += rows.len();

    let polygon_header = opened.polygons.header.clone();
    let layer_header = opened.layers.as_ref().and_then(|l| l.header.clone());
    let mut records = Vec::with_capacity(rows.len());
    let mut malformed = Vec::new();

    for (offset, row) in rows.into_iter().enumerate() {
        let field = first_field(&row).unwrap_or_default().to_string();
        let feature_id = match parse_feature_id(&row) {
            Some(id) => id,
            None if field.is_empty() => field,
            None => {
                malformed.push(
                    BatchError::data_read(
                        ErrorCode::READ_MALFORMED_ROW,
                        partition,
                        format!(
                            "Polygon record {} has a non-numeric feature id",
                            chunk.start_index + offset
                        ),
                        Some(opened.polygon_path.clone()),
                    )
                    .with_feature_id(field),
                );
                continue;
            }
        };
        records.push(
            BatchRecord::new(feature_id, row, partition)
                .with_headers(polygon_header.clone(), layer_header.clone()),
        );
    }

    if let Some(index) = opened.layers.as_mut() {
        let layers = index
            .rows_for(records.iter().map(|r| r.feature_id.as_str()))
            .to_read_error(partition, &opened.layer_path)?;
        for record in &mut records {
            if let Some(rows) = layers.get(&record.feature_id) {
                record.raw_layers = rows.clone();
            }
        }
    }

    Ok(Some(LoadedChunk {
        chunk,
        records,
        malformed,
    }))
}
