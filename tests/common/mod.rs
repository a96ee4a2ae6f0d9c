//! Common test utilities and helpers

#![allow(dead_code)]

use anyhow::Result;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const POLYGON_HEADER: &str = "FEATURE_ID,MAP_ID,POLYGON_NUMBER,DISTRICT";
pub const LAYER_HEADER: &str = "FEATURE_ID,LAYER_ID,LAYER_LEVEL,SPECIES_CD_1";

/// Builder for a polygon/layer inventory pair
pub struct InventoryBuilder {
    polygons: Vec<String>,
    layers: Vec<String>,
    with_headers: bool,
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self {
            polygons: Vec::new(),
            layers: Vec::new(),
            with_headers: true,
        }
    }

    /// Add a polygon with `layer_count` layers
    pub fn polygon(mut self, feature_id: u64, layer_count: usize) -> Self {
        self.polygons
            .push(format!("{feature_id},MAP{},{feature_id},D1", feature_id % 7));
        for layer in 1..=layer_count {
            let level = if layer == 1 { "P" } else { "S" };
            self.layers.push(format!("{feature_id},{layer},{level},PL"));
        }
        self
    }

    /// Add `count` polygons with consecutive ids starting at `first`
    pub fn polygons(mut self, first: u64, count: u64, layers_each: usize) -> Self {
        for id in first..first + count {
            self = self.polygon(id, layers_each);
        }
        self
    }

    /// Add a layer row for a feature id that has no polygon
    pub fn orphan_layer(mut self, feature_id: u64) -> Self {
        self.layers.push(format!("{feature_id},1,P,FD"));
        self
    }

    /// Add a raw polygon row as-is
    pub fn raw_polygon(mut self, line: &str) -> Self {
        self.polygons.push(line.to_string());
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.with_headers = false;
        self
    }

    pub fn polygon_csv(&self) -> String {
        Self::render(self.with_headers.then_some(POLYGON_HEADER), &self.polygons)
    }

    pub fn layer_csv(&self) -> String {
        Self::render(self.with_headers.then_some(LAYER_HEADER), &self.layers)
    }

    fn render(header: Option<&str>, rows: &[String]) -> String {
        let mut out = String::new();
        if let Some(header) = header {
            out.push_str(header);
            out.push('\n');
        }
        for row in rows {
            out.push_str(row);
            out.push('\n');
        }
        out
    }

    /// Write both files into `dir` and return their paths
    pub fn write_to(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)?;
        let polygons = dir.join("polygons.csv");
        let layers = dir.join("layers.csv");
        fs::write(&polygons, self.polygon_csv())?;
        fs::write(&layers, self.layer_csv())?;
        Ok((polygons, layers))
    }
}

/// Test context that manages temporary directories and cleanup
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    /// Get the path to the test directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a file in the test directory
    pub fn create_file(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        let full_path = self.temp_dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, content)?;
        Ok(full_path)
    }
}

/// Names of all entries in a ZIP archive
pub fn zip_entry_names(path: &Path) -> Result<Vec<String>> {
    let archive = zip::ZipArchive::new(File::open(path)?)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Text of one ZIP entry
pub fn zip_entry_text(path: &Path, name: &str) -> Result<String> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut entry = archive.by_name(name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

/// Feature ids (first column) of the data rows of a CSV file
pub fn data_feature_ids(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter_map(|line| line.split(',').next())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect())
}
