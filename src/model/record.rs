use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Position of one chunk within a partition's input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub partition_name: String,
    pub job_base_dir: PathBuf,
    /// Zero-based index of the first data record in the chunk
    pub start_index: usize,
    pub record_count: usize,
}

impl ChunkMetadata {
    pub fn end_index(&self) -> usize {
        self.start_index + self.record_count
    }
}

/// One polygon row together with the layer rows keyed to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub feature_id: String,
    pub raw_polygon: String,
    pub raw_layers: Vec<String>,
    pub polygon_header: Option<String>,
    pub layer_header: Option<String>,
    pub partition_name: String,
}

impl BatchRecord {
    pub fn new(
        feature_id: impl Into<String>,
        raw_polygon: impl Into<String>,
        partition_name: impl Into<String>,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            raw_polygon: raw_polygon.into(),
            raw_layers: Vec::new(),
            polygon_header: None,
            layer_header: None,
            partition_name: partition_name.into(),
        }
    }

    pub fn with_layers(mut self, layers: Vec<String>) -> Self {
        self.raw_layers = layers;
        self
    }

    pub fn with_headers(mut self, polygon: Option<String>, layer: Option<String>) -> Self {
        self.polygon_header = polygon;
        self.layer_header = layer;
        self
    }
}
