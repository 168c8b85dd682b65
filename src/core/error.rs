/// sqlconnect Error Module
///
/// This module defines the error types shared by the configuration resolver,
/// the database sessions and the `Connector` facade. Messages never contain
/// resolved passwords.
use std::path::PathBuf;
use thiserror::Error;

/// Error type for every sqlconnect operation.
///
/// The variants fall into three groups:
/// - Configuration resolution (file lookup, entry lookup, required keys,
///   credential references)
/// - Caller argument validation
/// - Execution failures coming back from file I/O or the database client
#[derive(Error, Debug)]
pub enum SqlconnectError {
    /// No configuration file exists at any searched location
    #[error("Config file not found in {}", join_paths(.candidates))]
    ConfigNotFound { candidates: Vec<PathBuf> },

    /// The configuration file exists but could not be read
    #[error("Failed to read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML
    #[error("Failed to parse config file {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The connection name is absent from (or empty within) `connections`
    #[error("Connection configuration for '{connection}' not found in {}", .path.display())]
    MissingEntry { connection: String, path: PathBuf },

    /// One or more required keys are absent; always lists every missing key
    #[error("Missing required configuration keys: {} for connection '{connection}'", .keys.join(", "))]
    MissingFields { connection: String, keys: Vec<String> },

    /// A configuration value has the wrong shape
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credential references could not be resolved from the environment
    #[error(
        "Environment variables '{username_var}' and/or '{password_var}' not found in {}",
        join_paths(.searched)
    )]
    EnvironmentResolution {
        username_var: String,
        password_var: String,
        searched: Vec<PathBuf>,
    },

    /// The credential file exists but could not be loaded.
    ///
    /// Only the error position is reported, never the offending line.
    #[error("Failed to load environment file {}: {message}", .path.display())]
    EnvFile { path: PathBuf, message: String },

    /// The caller passed an argument of the wrong shape
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A query, command or write failed; the cause is kept in the message
    #[error("{context}: {source}")]
    Execution {
        context: String,
        #[source]
        source: Box<SqlconnectError>,
    },

    /// No session implementation exists for the descriptor's dialect
    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    /// `IfExists::Fail` and the target table is already present
    #[error("Table '{0}' already exists")]
    TableExists(String),

    /// Result conversion errors (unsupported column types and the like)
    #[error("Query error: {0}")]
    Query(String),

    /// Errors from SQLite operations
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Errors from PostgreSQL operations
    #[error("PostgreSQL error: {}", postgres_message(.0))]
    Postgres(#[from] postgres::Error),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

impl SqlconnectError {
    /// Wraps `source` as an execution failure with the given context.
    pub fn execution(context: impl Into<String>, source: SqlconnectError) -> Self {
        SqlconnectError::Execution {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Server message with detail and SQLSTATE, or the client error with its
/// cause chain. `postgres::Error` alone only displays its kind.
fn postgres_message(err: &postgres::Error) -> String {
    if let Some(db) = err.as_db_error() {
        let mut message = format!("{}: {}", db.severity(), db.message());
        if let Some(detail) = db.detail() {
            message.push_str(&format!(" ({detail})"));
        }
        message.push_str(&format!(" [SQLSTATE {}]", db.code().code()));
        return message;
    }

    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = std::error::Error::source(cause);
    }
    message
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Type alias for Result to use SqlconnectError as the error type.
pub type Result<T> = std::result::Result<T, SqlconnectError>;
