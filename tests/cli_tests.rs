//! Tests of the `sqlconnect` binary.

use assert_cmd::Command;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A temp dir holding `sqlconnect.yaml` with one SQLite connection `Local`.
fn workspace() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("local.db");
    Connection::open(&db)
        .unwrap()
        .execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO t VALUES (1, 'one'), (2, NULL), (3, 'three');",
        )
        .unwrap();
    let config = dir.path().join("sqlconnect.yaml");
    fs::write(
        &config,
        format!(
            "connections:\n  Local:\n    dialect: sqlite\n    dbapi: rusqlite\n    host: '{}'\n",
            db.display()
        ),
    )
    .unwrap();
    (dir, config)
}

fn sqlconnect(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sqlconnect").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_url_uses_config_in_current_dir() {
    let (dir, _) = workspace();
    let output = sqlconnect(&dir).args(["-q", "Local", "url"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("sqlite+rusqlite://"), "{stdout}");
    assert!(stdout.trim_end().ends_with("local.db"), "{stdout}");
}

#[test]
fn test_query_prints_csv() {
    let (dir, config) = workspace();
    sqlconnect(&dir)
        .arg("--config")
        .arg(&config)
        .args(["-q", "Local", "query", "SELECT id, name FROM t ORDER BY id"])
        .assert()
        .success()
        .stdout("id,name\n1,one\n2,\n3,three\n");
}

#[test]
fn test_chunked_query_prints_one_header_as_json_lines() {
    let (dir, _) = workspace();
    sqlconnect(&dir)
        .args(["-q", "Local", "query", "--chunk-size", "2", "--format", "json"])
        .arg("SELECT id, name FROM t ORDER BY id")
        .assert()
        .success()
        .stdout("{\"id\":1,\"name\":\"one\"}\n{\"id\":2,\"name\":null}\n{\"id\":3,\"name\":\"three\"}\n");
}

#[test]
fn test_exec_then_load() {
    let (dir, _) = workspace();
    sqlconnect(&dir)
        .args(["-q", "Local", "exec", "DELETE FROM t WHERE id = 2"])
        .assert()
        .success();

    let csv = dir.path().join("people.csv");
    fs::write(&csv, "name,age\nann,31\nbo,\n").unwrap();
    sqlconnect(&dir)
        .args(["-q", "Local", "load", "--table", "people", "--no-index"])
        .arg(&csv)
        .assert()
        .success();

    sqlconnect(&dir)
        .args(["-q", "Local", "query", "SELECT (SELECT COUNT(*) FROM t) AS t, (SELECT COUNT(*) FROM people) AS p"])
        .assert()
        .success()
        .stdout("t,p\n2,2\n");
}

#[test]
fn test_failed_command_exits_non_zero() {
    let (dir, _) = workspace();
    let output = sqlconnect(&dir)
        .args(["-q", "Local", "exec", "INSERT INTO t VALUES (1, 'dup')"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("An error occurred"), "{stderr}");
}

#[test]
fn test_missing_config_names_searched_paths() {
    let dir = TempDir::new().unwrap();
    let output = sqlconnect(&dir)
        .env("HOME", dir.path())
        .args(["-q", "Anything", "url"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Config file not found in"), "{stderr}");
    assert!(stderr.contains("sqlconnect.yaml"), "{stderr}");
}
