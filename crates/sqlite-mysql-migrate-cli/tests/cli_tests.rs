//! CLI integration tests for sqlite-mysql-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! the source-side commands and exit codes for error conditions.

use assert_cmd::Command;
use predicates::prelude::*;
use rusqlite::Connection;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Get a command for the sqlite-mysql-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("sqlite-mysql-migrate").unwrap()
}

/// A small Grafana-like database in a temp directory.
fn fixture() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("grafana.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE org (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE tag (key TEXT, value TEXT);
         INSERT INTO org VALUES (1, 'Main Org.'), (2, 'Ops');
         INSERT INTO tag VALUES ('env', 'prod'), ('env', 'prod'), ('team', 'db');",
    )
    .unwrap();
    (dir, path)
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("schema"))
        .stdout(predicate::str::contains("preview"))
        .stdout(predicate::str::contains("test-connection"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--host"))
        .stdout(predicate::str::contains("--database"))
        .stdout(predicate::str::contains("--no-data"))
        .stdout(predicate::str::contains("--resolve-duplicates"))
        .stdout(predicate::str::contains("--duplicate-strategy"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sqlite-mysql-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("--grafana-hints"));
}

// =============================================================================
// Source Commands
// =============================================================================

#[test]
fn test_schema_json() {
    let (_dir, db) = fixture();
    let output = cmd()
        .args(["--output-json", "schema"])
        .arg(&db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["org"]["record_count"], 2);
    assert_eq!(json["org"]["columns"][0]["pk"], true);
    assert_eq!(json["tag"]["columns"][0]["type"], "TEXT");
}

#[test]
fn test_schema_text() {
    let (_dir, db) = fixture();
    cmd()
        .arg("schema")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains("org (2 rows)"))
        .stdout(predicate::str::contains("name TEXT not null"));
}

#[test]
fn test_preview_pages_rows() {
    let (_dir, db) = fixture();
    cmd()
        .arg("preview")
        .arg(&db)
        .args(["tag", "--limit", "1", "--offset", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"team\""))
        .stdout(predicate::str::contains("\"prod\"").not());
}

#[test]
fn test_missing_source_exit_code() {
    cmd()
        .args(["schema", "/nonexistent/source.db"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("Source unreadable"));
}

#[test]
fn test_export_writes_script() {
    let (dir, db) = fixture();
    let out = dir.path().join("out.sql");
    cmd()
        .arg("export")
        .arg(&db)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("tag: 2 rows"));

    let sql = std::fs::read_to_string(&out).unwrap();
    assert!(sql.starts_with("-- Migration from SQLite to MySQL"));
    assert!(sql.contains("CREATE TABLE `org`"));
    assert!(sql.contains("SET FOREIGN_KEY_CHECKS=1;"));
}

#[test]
fn test_export_keeps_duplicates_when_disabled() {
    let (dir, db) = fixture();
    let out = dir.path().join("out.sql");
    cmd()
        .arg("export")
        .arg(&db)
        .args(["--resolve-duplicates", "false", "--no-data"])
        .arg("--output")
        .arg(&out)
        .assert()
        .success();
    let sql = std::fs::read_to_string(&out).unwrap();
    assert!(!sql.contains("INSERT INTO"));
}

#[test]
fn test_export_rejects_unknown_strategy() {
    let (_dir, db) = fixture();
    cmd()
        .arg("export")
        .arg(&db)
        .args(["--duplicate-strategy", "merge"])
        .assert()
        .failure()
        .code(2);
}

// =============================================================================
// Target Commands
// =============================================================================

#[test]
fn test_connection_to_closed_port_reports_error() {
    cmd()
        .args([
            "--output-json",
            "test-connection",
            "--host",
            "127.0.0.1",
            "--port",
            "1",
            "--user",
            "root",
            "--password",
            "hunter2",
            "--database",
            "grafana",
        ])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("\"status\": \"error\""))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_invalid_port_is_validation_error() {
    cmd()
        .args([
            "test-connection",
            "--host",
            "localhost",
            "--port",
            "0",
            "--user",
            "root",
            "--database",
            "grafana",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Validation error"));
}

#[test]
fn test_migrate_unreachable_target_fails_job() {
    let (_dir, db) = fixture();
    cmd()
        .arg("migrate")
        .arg(&db)
        .args([
            "--host",
            "127.0.0.1",
            "--port",
            "1",
            "--user",
            "root",
            "--database",
            "grafana",
        ])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("ERROR: Connectivity error"));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_invalid_config_exit_code() {
    let (dir, db) = fixture();
    let config = dir.path().join("config.yaml");
    let mut file = std::fs::File::create(&config).unwrap();
    writeln!(file, "workers: 0").unwrap();

    cmd()
        .arg("--config")
        .arg(&config)
        .arg("schema")
        .arg(&db)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("workers must be at least 1"));
}

#[test]
fn test_missing_subcommand_is_usage_error() {
    cmd().assert().failure().code(2);
}
