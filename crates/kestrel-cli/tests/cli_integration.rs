//! Integration tests for the `kestrel` binary.
//!
//! Each test writes unit files into a temporary directory and runs the
//! built binary against them.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const ADD_UNIT: &str = r#"{
    "name": "add",
    "arg_count": 2,
    "code": [
        {"op": "LOAD_FAST", "arg": 0},
        {"op": "LOAD_FAST", "arg": 1},
        {"op": "BINARY_ADD"},
        {"op": "RETURN_VALUE"}
    ]
}"#;

const BAD_JUMP_UNIT: &str = r#"{
    "name": "bad",
    "code": [
        {"op": "JUMP_ABSOLUTE", "arg": 99}
    ]
}"#;

fn kestrel(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kestrel"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("KESTREL_CONFIG")
        .env_remove("KESTREL_LOG")
        .output()
        .expect("failed to run kestrel")
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ────────────────────────────────────────────────────────────────────────────
// Diagnostics
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_disasm() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "add.json", ADD_UNIT);

    let output = kestrel(&["disasm", unit.to_str().unwrap()]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("unit add"));
    assert!(text.contains("BINARY_ADD"));
}

#[test]
fn test_graph_with_integer_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "add.json", ADD_UNIT);

    let output = kestrel(&["graph", "--kinds", "integer,integer", unit.to_str().unwrap()]);
    assert!(output.status.success());
    let dot = stdout(&output);
    assert!(dot.starts_with("digraph \"add\" {"));
    assert!(dot.contains("no-escape"));
}

#[test]
fn test_analyze_unknown_kind_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "add.json", ADD_UNIT);

    let output = kestrel(&["analyze", "--kinds", "int", unit.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_unit_fails() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "bad.json", BAD_JUMP_UNIT);

    let output = kestrel(&["cfg", unit.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid jump target"));
}

// ────────────────────────────────────────────────────────────────────────────
// Runs
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_reports_compilation() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "add.json", ADD_UNIT);

    let output = kestrel(&["run", "-n", "3", "--json", unit.to_str().unwrap(), "2", "3"]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["results"], serde_json::json!(["5", "5", "5"]));
    assert_eq!(report["status"], "compiled_with_profiling");
    assert_eq!(report["generation"], 1);
    assert_eq!(report["speculations"].as_array().unwrap().len(), 2);
}

#[test]
fn test_run_respects_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "add.json", ADD_UNIT);
    let config = write(dir.path(), "kestrel.toml", "[jit]\ncompile_threshold = 10\n");

    let output = kestrel(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "-n",
        "3",
        "--json",
        unit.to_str().unwrap(),
        "1",
        "1",
    ]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["status"], "uncompiled");
    assert_eq!(report["generation"], 0);
}

#[test]
fn test_run_binary_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "add.json", ADD_UNIT);
    let encoded = dir.path().join("add.kstl");

    let output = kestrel(&[
        "encode",
        unit.to_str().unwrap(),
        "-o",
        encoded.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let output = kestrel(&["run", "--json", encoded.to_str().unwrap(), "\"a\"", "\"b\""]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["results"], serde_json::json!(["\"ab\""]));
}

#[test]
fn test_run_runtime_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let unit = write(dir.path(), "add.json", ADD_UNIT);

    let output = kestrel(&["run", unit.to_str().unwrap(), "1", "\"x\""]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("TypeError"));
}
