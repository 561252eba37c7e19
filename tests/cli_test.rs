//! CLI surface tests: exit codes and basic command flows through the
//! real binary.

use std::process::Command;
use tempfile::TempDir;

fn repolens() -> Command {
    Command::new(env!("CARGO_BIN_EXE_repolens"))
}

#[test]
fn init_writes_config_and_refuses_overwrite() {
    let dir = TempDir::new().unwrap();

    let output = repolens()
        .current_dir(dir.path())
        .args(["init"])
        .output()
        .expect("run init");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let config = dir.path().join(".repolens/settings.toml");
    assert!(config.exists());
    let content = std::fs::read_to_string(&config).unwrap();
    assert!(content.contains("version = 1"));
    assert!(content.contains("[indexing]"));

    // Second init without --force fails with a generic error
    let output = repolens()
        .current_dir(dir.path())
        .args(["init"])
        .output()
        .expect("run init again");
    assert!(!output.status.success());

    let output = repolens()
        .current_dir(dir.path())
        .args(["init", "--force"])
        .output()
        .expect("run init --force");
    assert!(output.status.success());
}

#[test]
fn index_then_search_finds_symbols() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("app.py"),
        "def authenticate_user(token):\n    return token\n",
    )
    .unwrap();

    let output = repolens()
        .current_dir(dir.path())
        .args(["index"])
        .output()
        .expect("run index");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let output = repolens()
        .current_dir(dir.path())
        .args(["search", "authenticate_user"])
        .output()
        .expect("run search");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("app.py"), "stdout: {stdout}");
}

#[test]
fn empty_query_exits_with_invalid_arguments() {
    let dir = TempDir::new().unwrap();
    let output = repolens()
        .current_dir(dir.path())
        .args(["search", "   "])
        .output()
        .expect("run search");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn status_reports_empty_index() {
    let dir = TempDir::new().unwrap();
    let output = repolens()
        .current_dir(dir.path())
        .args(["status"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let status: serde_json::Value = serde_json::from_str(&stdout).expect("status is JSON");
    assert_eq!(status["indexed_files"]["total"], 0);
}

#[test]
fn export_excludes_env_and_writes_audit() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "API_KEY=secret\n").unwrap();
    std::fs::write(dir.path().join("app.py"), "def install(): pass\n").unwrap();

    let output = repolens()
        .current_dir(dir.path())
        .args(["index"])
        .output()
        .expect("run index");
    assert!(output.status.success());

    let out = dir.path().join("shared.db");
    let output = repolens()
        .current_dir(dir.path())
        .args(["export", out.to_str().unwrap()])
        .output()
        .expect("run export");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(out.exists());

    let audit_path = out.with_extension("audit.json");
    let audit: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(audit_path).unwrap()).unwrap();
    assert!(
        audit["excluded_files"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == ".env")
    );
}
