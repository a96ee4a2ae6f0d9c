//! Boundary to the projection engine
//!
//! The engine itself lives outside this crate. [`ProjectionService`] is the
//! seam the writer calls through; [`EchoProjection`] is a deterministic
//! stand-in used by the binary and the tests.

use super::output::{LogKind, PartitionOutput};
use crate::error::BatchResult;
use crate::model::BatchRecord;
use crate::partition::csv_line::split_fields;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENABLE_PROGRESS_LOGGING: &str = "DoEnableProgressLogging";
pub const ENABLE_ERROR_LOGGING: &str = "DoEnableErrorLogging";
pub const ENABLE_DEBUG_LOGGING: &str = "DoEnableDebugLogging";

/// Job-level projection parameters, deserialized once per step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectionParameters {
    pub output_format: Option<String>,
    pub selected_execution_options: Vec<String>,
    pub selected_debug_options: Vec<String>,
    pub age_start: Option<i32>,
    pub age_end: Option<i32>,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    pub age_increment: Option<i32>,
    /// Options this crate does not interpret, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProjectionParameters {
    pub fn has_execution_option(&self, option: &str) -> bool {
        self.selected_execution_options
            .iter()
            .any(|o| o.eq_ignore_ascii_case(option))
    }
}

/// One chunk handed to the projection engine
#[derive(Debug, Clone, Copy)]
pub struct ProjectionRequest<'a> {
    pub records: &'a [BatchRecord],
    pub partition_name: &'a str,
    pub parameters: &'a ProjectionParameters,
    pub job_execution_id: u64,
    pub job_guid: &'a str,
    pub job_base_dir: &'a Path,
    pub projection_id: &'a str,
}

/// External projection engine
///
/// Returns a textual summary of the chunk. Errors carry their own
/// retryability, see [`crate::error::BatchError::is_retryable`].
#[async_trait]
pub trait ProjectionService: Send + Sync {
    async fn project(&self, request: ProjectionRequest<'_>) -> BatchResult<String>;
}

pub const ECHO_YIELD_HEADER: &str =
    "TABLE_NUM,FEATURE_ID,DISTRICT,MAP_ID,POLYGON_ID,LAYER_ID,LAYER_LEVEL";

/// Emits one yield row per (feature id, layer) without projecting anything
#[derive(Debug, Clone, Default)]
pub struct EchoProjection;

impl EchoProjection {
    pub fn new() -> Self {
        Self
    }

    fn field(record: &Option<csv::StringRecord>, index: usize) -> String {
        record
            .as_ref()
            .and_then(|r| r.get(index))
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl ProjectionService for EchoProjection {
    async fn project(&self, request: ProjectionRequest<'_>) -> BatchResult<String> {
        let output = PartitionOutput::new(request.job_base_dir, request.partition_name);
        let params = request.parameters;

        let mut rows = Vec::new();
        let mut progress = String::new();
        let mut errors = String::new();
        let mut table_num = 0u32;

        for record in request.records {
            let polygon = split_fields(&record.raw_polygon);
            let map_id = Self::field(&polygon, 1);
            let polygon_id = Self::field(&polygon, 2);

            if record.raw_layers.is_empty() {
                errors.push_str(&format!(
                    "{}: polygon {} has no layers\n",
                    request.projection_id, record.feature_id
                ));
                continue;
            }

            for layer_row in &record.raw_layers {
                let layer = split_fields(layer_row);
                table_num += 1;
                rows.push(format!(
                    "{},{},,{},{},{},{}",
                    table_num,
                    record.feature_id,
                    map_id,
                    polygon_id,
                    Self::field(&layer, 1),
                    Self::field(&layer, 2)
                ));
            }
            progress.push_str(&format!(
                "{}: projected polygon {} with {} layers\n",
                request.projection_id,
                record.feature_id,
                record.raw_layers.len()
            ));
        }

        if !rows.is_empty() {
            output.append_yield_rows(ECHO_YIELD_HEADER, &rows).await?;
        }
        if params.has_execution_option(ENABLE_PROGRESS_LOGGING) {
            output.append_log(LogKind::Progress, &progress).await?;
        }
        if params.has_execution_option(ENABLE_ERROR_LOGGING) {
            output.append_log(LogKind::Error, &errors).await?;
        }
        if params.has_execution_option(ENABLE_DEBUG_LOGGING) {
            output.append_log(
                LogKind::Debug,
                &format!(
                    "{}: {} records, {} yield rows",
                    request.projection_id,
                    request.records.len(),
                    rows.len()
                ),
            )
            .await?;
        }

        Ok(format!(
            "Projected {} polygons into {} yield rows ({})",
            request.records.len(),
            rows.len(),
            request.projection_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn params(options: &[&str]) -> ProjectionParameters {
        ProjectionParameters {
            selected_execution_options: options.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parameters_from_camel_case_json() {
        let parsed: ProjectionParameters = serde_json::from_str(
            r#"{"outputFormat":"CSVYieldTable","selectedExecutionOptions":["DoEnableProgressLogging"],"ageStart":10,"reportTitle":"t"}"#,
        )
        .unwrap();
        assert_eq!(parsed.output_format.as_deref(), Some("CSVYieldTable"));
        assert!(parsed.has_execution_option("doenableprogresslogging"));
        assert_eq!(parsed.age_start, Some(10));
        assert!(parsed.extra.contains_key("reportTitle"));
    }

    #[tokio::test]
    async fn test_echo_writes_rows_and_logs() {
        let temp = TempDir::new().unwrap();
        let records = vec![
            BatchRecord::new("101", "101,093C090,94", "partition0")
                .with_layers(vec!["101,1,P".into(), "101,2,S".into()]),
            BatchRecord::new("102", "102,093C090,95", "partition0"),
        ];
        let parameters = params(&[ENABLE_PROGRESS_LOGGING, ENABLE_ERROR_LOGGING]);

        let summary = EchoProjection::new()
            .project(ProjectionRequest {
                records: &records,
                partition_name: "partition0",
                parameters: &parameters,
                job_execution_id: 1,
                job_guid: "g",
                job_base_dir: temp.path(),
                projection_id: "p-1",
            })
            .await
            .unwrap();
        assert!(summary.contains("2 yield rows"));

        let output = PartitionOutput::new(temp.path(), "partition0");
        let table = fs::read_to_string(output.yield_table_path()).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], ECHO_YIELD_HEADER);
        assert_eq!(lines[1], "1,101,,093C090,94,1,P");
        assert_eq!(lines[2], "2,101,,093C090,94,2,S");

        let errors = fs::read_to_string(output.log_path(LogKind::Error)).unwrap();
        assert!(errors.contains("polygon 102 has no layers"));
        assert!(output.log_path(LogKind::Progress).exists());
        assert!(!output.log_path(LogKind::Debug).exists());
    }
}
