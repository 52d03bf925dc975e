//! CLI smoke tests: verify the commands that work without docker.
//!
//! These tests run the compiled binary and verify exit codes and output.
//! `HOME` points at a temp dir so no user config is picked up.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Helper: run stagehand with given args and return (exit_code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_stagehand");
    let output = Command::new(bin)
        .args(args)
        .env("RUST_LOG", "") // suppress tracing noise
        .env("HOME", home)
        .env_remove("STAGEHAND_TOPOLOGY_ROOT")
        .env_remove("STAGEHAND_TOPOLOGY_TOKEN")
        .env_remove("STAGEHAND_RUNTIME_BACKEND")
        .output()
        .expect("failed to execute stagehand binary");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

/// A checkout with every asset the quickstart mounts.
fn checkout() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("data-api")).unwrap();
    std::fs::write(dir.path().join("data-api/dab-config.json"), "{}").unwrap();
    std::fs::create_dir_all(dir.path().join("web-app")).unwrap();
    std::fs::write(dir.path().join("web-app/index.html"), "<html></html>").unwrap();
    std::fs::create_dir_all(dir.path().join("database")).unwrap();
    dir
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &[]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("stagehand"));
}

#[test]
fn cli_help_flag() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Commands:"));
    assert!(stdout.contains("up"));
    assert!(stdout.contains("plan"));
}

#[test]
fn cli_version_command() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("stagehand"));
    assert!(stdout.contains('.'));
}

#[test]
fn cli_unknown_command_fails() {
    let home = tempfile::tempdir().unwrap();
    let (code, _stdout, stderr) = run_cli(home.path(), &["frobnicate"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("frobnicate"));
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn cli_config_check_without_file() {
    let home = tempfile::tempdir().unwrap();
    let (code, stdout, _stderr) = run_cli(home.path(), &["config", "check"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No config file found"));
}

#[test]
fn cli_config_check_reports_typos() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("config.json");
    std::fs::write(&path, r#"{"probe":{"max_atempts":3}}"#).unwrap();
    let (code, stdout, _stderr) = run_cli(
        home.path(),
        &["config", "check", "--config", path.to_str().unwrap()],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("did you mean 'max_attempts'?"));
    assert!(stdout.contains("1 error(s)"));
}

// ============================================================================
// Plan & URLs
// ============================================================================

#[test]
fn cli_plan_lists_waves() {
    let home = tempfile::tempdir().unwrap();
    let root = checkout();
    let (code, stdout, stderr) = run_cli(
        home.path(),
        &["plan", "--root", root.path().to_str().unwrap()],
    );
    assert_eq!(code, 0, "stderr: {}", stderr);
    assert!(stdout.contains("Start waves:"));
    assert!(stdout.contains("TodoDb"));
    assert!(stdout.contains("qs4-sql-project"));
    assert!(stdout.contains("(waits until completed)"));
    assert!(stdout.contains("sql-password (secret)"));
}

#[test]
fn cli_plan_missing_assets_fails() {
    let home = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let (code, _stdout, stderr) = run_cli(
        home.path(),
        &["plan", "--root", root.path().to_str().unwrap()],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("dab-config.json"));
}

#[test]
fn cli_urls_lists_display_urls() {
    let home = tempfile::tempdir().unwrap();
    let root = checkout();
    let (code, stdout, _stderr) = run_cli(
        home.path(),
        &["urls", "--root", root.path().to_str().unwrap()],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("http://localhost:5000/graphql"));
    assert!(stdout.contains("http://localhost:5173/"));
    assert!(stdout.contains("Commander"));
}

// ============================================================================
// Up
// ============================================================================

#[test]
fn cli_up_dry_run_brings_everything_up() {
    let home = tempfile::tempdir().unwrap();
    let root = checkout();
    let (code, stdout, stderr) = run_cli(
        home.path(),
        &["up", "--dry-run", "--root", root.path().to_str().unwrap()],
    );
    assert_eq!(code, 0, "stdout: {}\nstderr: {}", stdout, stderr);
    assert!(stdout.contains("runtime dry-run"));
    assert!(stdout.contains("Completed"));
    assert!(stdout.contains("GraphQL: http://localhost:5000/graphql"));
    assert!(stdout.contains("Stopped 7 resource(s)"));
}

#[test]
fn cli_up_without_assets_fails() {
    let home = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let (code, _stdout, _stderr) = run_cli(
        home.path(),
        &["up", "--dry-run", "--root", root.path().to_str().unwrap()],
    );
    assert_ne!(code, 0);
}
