/// # Test Utilities Module
///
/// Fixtures for tests that need configuration files, env files and SQLite
/// databases on disk. Every fixture owns a temporary directory that is
/// removed when the fixture is dropped.
use crate::config::SearchPaths;
use crate::core::Result;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory holding `sqlconnect.yaml`, `sqlconnect.env` and
/// SQLite database files.
pub struct WorkspaceFixture {
    dir: TempDir,
}

impl WorkspaceFixture {
    pub fn new() -> Result<Self> {
        Ok(WorkspaceFixture { dir: TempDir::new()? })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("sqlconnect.yaml")
    }

    pub fn env_path(&self) -> PathBuf {
        self.dir.path().join("sqlconnect.env")
    }

    /// Writes the configuration document.
    pub fn write_config(&self, yaml: &str) -> Result<PathBuf> {
        let path = self.config_path();
        fs::write(&path, yaml)?;
        Ok(path)
    }

    /// Writes the credential env file.
    pub fn write_env(&self, contents: &str) -> Result<PathBuf> {
        let path = self.env_path();
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Writes a SQL file under the fixture directory.
    pub fn write_sql(&self, name: &str, sql: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, sql)?;
        Ok(path)
    }

    /// Search list containing only this fixture's configuration file.
    pub fn config_search(&self) -> SearchPaths {
        SearchPaths::new(vec![self.config_path()])
    }

    /// Search list containing only this fixture's env file.
    pub fn env_search(&self) -> SearchPaths {
        SearchPaths::new(vec![self.env_path()])
    }

    /// Creates `name` as a SQLite database with the sample schema and rows.
    pub fn sample_database(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        let connection = Connection::open(&path)?;
        connection.execute_batch(
            "
            CREATE TABLE employees (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                salary REAL,
                active BOOLEAN DEFAULT TRUE
            );

            INSERT INTO employees (id, name, salary) VALUES (1, 'alice', 5200.0);
            INSERT INTO employees (id, name, salary) VALUES (2, 'bob', 4100.5);
            INSERT INTO employees (id, name, salary) VALUES (3, 'charlie', NULL);
            ",
        )?;
        Ok(path)
    }

    /// Writes a config with a single SQLite connection `name` over `db_path`.
    pub fn sqlite_config(&self, name: &str, db_path: &Path) -> Result<PathBuf> {
        self.write_config(&format!(
            "connections:\n  {name}:\n    dialect: sqlite\n    dbapi: rusqlite\n    host: '{}'\n",
            db_path.display()
        ))
    }
}

/// Error assertions shared across test modules
pub mod error_testing {
    use std::fmt::Display;

    /// Asserts that `result` failed and that its message contains `needle`.
    pub fn assert_error_contains<T, E: Display>(result: &std::result::Result<T, E>, needle: &str) {
        match result {
            Ok(_) => panic!("Expected an error containing '{needle}'"),
            Err(err) => {
                let message = err.to_string();
                assert!(
                    message.contains(needle),
                    "Error '{message}' does not contain '{needle}'"
                );
            }
        }
    }

    /// Asserts that the error message does not leak `secret`.
    pub fn assert_no_secret<E: Display>(err: &E, secret: &str) {
        assert!(
            !err.to_string().contains(secret),
            "Error message leaked a secret: {err}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_database_fixture() {
        let fixture = WorkspaceFixture::new().unwrap();
        let db = fixture.sample_database("hr.db").unwrap();
        let connection = Connection::open(db).unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM employees", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }
}
