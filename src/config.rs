//! Connection configuration lookup.
//!
//! A configuration document is a YAML file with a top-level `connections`
//! mapping keyed by connection name:
//!
//! ```yaml
//! connections:
//!   Warehouse:
//!     dialect: postgresql
//!     dbapi: psycopg2
//!     host: dev-server
//!     database: DevDB
//!     username: ${DB_USER}
//!     password: ${DB_PASS}
//!     options:
//!       sslmode: require
//! ```
//!
//! The file is located through an ordered [`SearchPaths`] list; the first
//! existing file wins.
use crate::core::{Result, SqlconnectError};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Base name for the default configuration and credential files.
pub const APP_NAME: &str = "sqlconnect";

/// Keys every connection entry must define.
pub const REQUIRED_KEYS: [&str; 3] = ["dialect", "dbapi", "host"];

/// An ordered list of candidate file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPaths {
    candidates: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        SearchPaths { candidates }
    }

    /// `./sqlconnect.yaml`, `./sqlconnect.yml`, `~/sqlconnect.yaml`, `~/sqlconnect.yml`
    pub fn config_files() -> Result<Self> {
        Self::in_default_dirs(&[
            format!("{APP_NAME}.yaml"),
            format!("{APP_NAME}.yml"),
        ])
    }

    /// `./sqlconnect.env`, `~/sqlconnect.env`
    pub fn env_files() -> Result<Self> {
        Self::in_default_dirs(&[format!("{APP_NAME}.env")])
    }

    /// Every file name in the current directory, then every file name in the
    /// home directory (skipped when there is no home directory).
    fn in_default_dirs(file_names: &[String]) -> Result<Self> {
        let mut dirs_to_search = vec![std::env::current_dir()?];
        if let Some(home) = dirs::home_dir() {
            dirs_to_search.push(home);
        }

        let candidates = dirs_to_search
            .iter()
            .flat_map(|dir| file_names.iter().map(move |name| dir.join(name)))
            .collect();
        Ok(SearchPaths { candidates })
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Returns the first candidate that exists on disk.
    pub fn first_existing(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|path| path.is_file())
    }
}

/// A connection entry exactly as written in the configuration document.
///
/// Values may still contain credential references such as `${DB_PASS}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEntry(Mapping);

impl RawEntry {
    pub fn new(mapping: Mapping) -> Self {
        RawEntry(mapping)
    }

    /// Parses an entry from a YAML snippet (handy for inline configs).
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| SqlconnectError::InvalidConfig(format!("connection entry: {e}")))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a scalar value as text; `None` for absent or null keys.
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => scalar_to_string(value).map(Some).ok_or_else(|| {
                SqlconnectError::InvalidConfig(format!("'{key}' must be a scalar value"))
            }),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys from [`REQUIRED_KEYS`] that are absent, null or blank, in order.
    pub fn missing_required_keys(&self) -> Vec<String> {
        REQUIRED_KEYS
            .iter()
            .filter(|key| match self.0.get(**key) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|key| key.to_string())
            .collect()
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }
}

impl From<Mapping> for RawEntry {
    fn from(mapping: Mapping) -> Self {
        RawEntry(mapping)
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Top-level configuration document.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub connections: Option<Mapping>,
}

/// Loads and parses a configuration document from the given path.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConfigDocument> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| SqlconnectError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;

    // An empty file parses as null; treat it as a document without connections.
    let document: Option<ConfigDocument> =
        serde_yaml::from_str(&content).map_err(|source| SqlconnectError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(document.unwrap_or_default())
}

/// Finds the configuration entry for `connection_name`.
///
/// With `explicit_path` only that file is consulted. Otherwise the first
/// existing file in `search` is used, even if it lacks the requested name.
///
/// # Errors
///
/// - `ConfigNotFound` if no candidate file exists
/// - `MissingEntry` if the name is absent or its entry is empty
/// - `MissingFields` listing every required key the entry lacks
pub fn resolve_connection_config(
    connection_name: &str,
    explicit_path: Option<&Path>,
    search: &SearchPaths,
) -> Result<RawEntry> {
    let explicit;
    let search = match explicit_path {
        Some(path) => {
            explicit = SearchPaths::new(vec![path.to_path_buf()]);
            &explicit
        }
        None => search,
    };

    debug!(candidates = ?search.candidates(), "probing for configuration file");
    let path = search
        .first_existing()
        .ok_or_else(|| SqlconnectError::ConfigNotFound {
            candidates: search.candidates().to_vec(),
        })?;
    info!(path = %path.display(), connection = connection_name, "using configuration file");

    let document = load_config(path)?;
    let missing_entry = || SqlconnectError::MissingEntry {
        connection: connection_name.to_string(),
        path: path.to_path_buf(),
    };

    let entry = match document
        .connections
        .as_ref()
        .and_then(|connections| connections.get(connection_name))
    {
        None | Some(Value::Null) => return Err(missing_entry()),
        Some(Value::Mapping(mapping)) if mapping.is_empty() => return Err(missing_entry()),
        Some(Value::Mapping(mapping)) => RawEntry(mapping.clone()),
        Some(_) => {
            return Err(SqlconnectError::InvalidConfig(format!(
                "connection '{connection_name}' in {} must be a mapping",
                path.display()
            )))
        }
    };

    check_required_keys(connection_name, &entry)?;
    Ok(entry)
}

/// Fails with `MissingFields` naming every missing required key.
pub fn check_required_keys(connection_name: &str, entry: &RawEntry) -> Result<()> {
    let keys = entry.missing_required_keys();
    if keys.is_empty() {
        Ok(())
    } else {
        Err(SqlconnectError::MissingFields {
            connection: connection_name.to_string(),
            keys,
        })
    }
}
