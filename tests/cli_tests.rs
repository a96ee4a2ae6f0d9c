//! Integration tests for the CLI interface

mod common;

use assert_cmd::Command;
use common::{zip_entry_names, InventoryBuilder};
use predicates::prelude::*;
use tempfile::TempDir;

fn forest_batch() -> Command {
    let mut cmd = Command::cargo_bin("forest-batch").unwrap();
    cmd.env("FOREST_BATCH_RETRY_BACKOFF", "0ms");
    cmd
}

#[test]
fn test_cli_help_flag() {
    forest_batch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_invalid_command() {
    forest_batch()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_run_produces_archive() {
    let temp = TempDir::new().unwrap();
    let (polygons, layers) = InventoryBuilder::new()
        .polygons(1, 5, 2)
        .write_to(&temp.path().join("in"))
        .unwrap();
    let out = temp.path().join("out");

    forest_batch()
        .arg("run")
        .arg("--polygons")
        .arg(&polygons)
        .arg("--layers")
        .arg(&layers)
        .args(["--partitions", "2", "--job-guid", "cli-job"])
        .arg("--output-root")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Job cli-job (COMPLETED)"))
        .stdout(predicate::str::contains("read: 5, written: 5"));

    let archive = out.join("forest-batch-job-cli-job/forest-output-cli-job.zip");
    let entries = zip_entry_names(&archive).unwrap();
    assert!(entries.contains(&"YieldTable.csv".to_string()));
    assert!(!out.join("forest-batch-job-cli-job/input-partition0").exists());
}

#[test]
fn test_run_with_missing_input_fails() {
    let temp = TempDir::new().unwrap();
    forest_batch()
        .arg("run")
        .arg("--polygons")
        .arg(temp.path().join("nope.csv"))
        .arg("--layers")
        .arg(temp.path().join("nope.csv"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn test_run_with_invalid_parameters_reports_failed_job() {
    let temp = TempDir::new().unwrap();
    let (polygons, layers) = InventoryBuilder::new()
        .polygons(1, 2, 1)
        .write_to(&temp.path().join("in"))
        .unwrap();

    forest_batch()
        .arg("run")
        .arg("--polygons")
        .arg(&polygons)
        .arg("--layers")
        .arg(&layers)
        .args(["--parameters", "not json", "--partitions", "1"])
        .arg("--output-root")
        .arg(temp.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILED"));
}

#[test]
fn test_config_reflects_file_and_environment() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("batch.toml");
    std::fs::write(&config, "[partitioning]\ngrid_size = 7\n").unwrap();

    forest_batch()
        .env("FOREST_BATCH_CHUNK_SIZE", "25")
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("grid_size = 7"))
        .stdout(predicate::str::contains("chunk_size = 25"));
}

#[test]
fn test_config_rejects_invalid_values() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("batch.toml");
    std::fs::write(&config, "[retry]\nmax_attempts = 0\n").unwrap();

    forest_batch()
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .failure();
}
