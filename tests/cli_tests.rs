// Integration tests for the benchtop inspector binary

use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::fs;
use std::process::Command;
use tempfile::TempDir;

use benchtop::persist::{save_bin_gz, save_mat, MatFile, MatVar};
use benchtop::snapshot::JsonSnapshot;
use serde::{Deserialize, Serialize};

fn benchtop_cmd() -> Command {
    Command::cargo_bin("benchtop").expect("benchtop binary should build")
}

#[test]
fn test_paths_subcommand_honors_project_env() {
    let dir = TempDir::new().unwrap();

    benchtop_cmd()
        .env("BENCHTOP_PROJECT_DIR", dir.path())
        .arg("paths")
        .assert()
        .success()
        .stdout(predicate::str::contains("Project dir"))
        .stdout(predicate::str::contains(dir.path().to_str().unwrap()))
        .stdout(predicate::str::contains("Monitor dir"));
}

#[test]
fn test_info_describes_mat_files() {
    let dir = TempDir::new().unwrap();
    let mut vars = MatFile::new();
    vars.insert("bias_v", MatVar::Vector(vec![0.0, 0.5, 1.0, 1.5]));
    vars.insert("temp_c", MatVar::Scalar(21.5));
    save_mat(dir.path().join("run.mat"), &vars).unwrap();

    benchtop_cmd()
        .arg("info")
        .arg(dir.path().join("run.mat"))
        .assert()
        .success()
        .stdout(predicate::str::contains("2 variables"))
        .stdout(predicate::str::contains("bias_v"))
        .stdout(predicate::str::contains("vector"))
        .stdout(predicate::str::contains("scalar"));
}

#[test]
fn test_info_describes_snapshot_json() {
    #[derive(Serialize, Deserialize)]
    struct OvenLog {
        setpoint_c: f64,
        ramp_rate: f64,
    }
    impl JsonSnapshot for OvenLog {}

    let dir = TempDir::new().unwrap();
    let log = OvenLog {
        setpoint_c: 180.0,
        ramp_rate: 2.5,
    };
    log.save(dir.path().join("oven")).unwrap();

    benchtop_cmd()
        .arg("info")
        .arg(dir.path().join("oven.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Snapshot file"))
        .stdout(predicate::str::contains("OvenLog"))
        .stdout(predicate::str::contains("setpoint_c"));
}

#[test]
fn test_info_reports_gzip_sizes() {
    let dir = TempDir::new().unwrap();
    let trace: Vec<f64> = (0..1000).map(|i| (i as f64).sin()).collect();
    save_bin_gz(dir.path().join("trace"), &trace).unwrap();

    benchtop_cmd()
        .arg("info")
        .arg(dir.path().join("trace.gz"))
        .assert()
        .success()
        .stdout(predicate::str::contains("compressed"))
        .stdout(predicate::str::contains("uncompressed"));
}

#[test]
fn test_info_falls_back_to_byte_count() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("raw.bin");
    fs::write(&path, [0u8; 64]).unwrap();

    benchtop_cmd()
        .arg("info")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("64 bytes"));
}

#[test]
fn test_info_missing_file_fails() {
    benchtop_cmd()
        .arg("info")
        .arg("/definitely/not/here.bin")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such file"));
}

#[test]
fn test_monitor_url_subcommand() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".monitorhostport"), "8050\n").unwrap();

    benchtop_cmd()
        .env("BENCHTOP_PROJECT_DIR", dir.path())
        .arg("monitor-url")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://"))
        .stdout(predicate::str::contains(":8050"));
}

#[test]
fn test_monitor_url_without_server_reads_null() {
    let dir = TempDir::new().unwrap();

    benchtop_cmd()
        .env("BENCHTOP_PROJECT_DIR", dir.path())
        .arg("monitor-url")
        .assert()
        .success()
        .stdout(predicate::str::contains(":null"));
}
