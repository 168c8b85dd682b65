//! The `Connector` facade.
//!
//! A `Connector` is built from a connection name, resolves its configuration
//! and credentials, opens exactly one [`Session`] and then runs queries,
//! commands and bulk writes against it.
//!
//! ```no_run
//! use sqlconnect::Connector;
//!
//! let mut conn = Connector::new("Warehouse")?;
//! let employees = conn.query("SELECT name FROM employees")?;
//! conn.execute("UPDATE employees SET active = 0 WHERE id = 3")?;
//! # Ok::<(), sqlconnect::SqlconnectError>(())
//! ```
use crate::config::{resolve_connection_config, RawEntry, SearchPaths};
use crate::core::db::{open_session, Session, Table, WriteOptions};
use crate::core::{Result, SqlconnectError};
use crate::descriptor::{build_connection_descriptor, ConnectionDescriptor};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Builder for [`Connector`].
///
/// Precedence: an explicit entry skips file lookup entirely; otherwise an
/// explicit file path is used; otherwise the config search list is searched.
#[derive(Debug, Clone)]
pub struct ConnectorBuilder {
    connection_name: String,
    config_path: Option<PathBuf>,
    entry: Option<RawEntry>,
    config_search: Option<SearchPaths>,
    env_search: Option<SearchPaths>,
}

impl ConnectorBuilder {
    /// Use exactly this configuration file.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Use this entry instead of reading any configuration file.
    pub fn config_entry(mut self, entry: RawEntry) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Override the configuration file search list.
    pub fn config_search(mut self, search: SearchPaths) -> Self {
        self.config_search = Some(search);
        self
    }

    /// Override the credential (env) file search list.
    pub fn env_search(mut self, search: SearchPaths) -> Self {
        self.env_search = Some(search);
        self
    }

    /// Resolves the descriptor without opening a session.
    pub fn resolve(&self) -> Result<ConnectionDescriptor> {
        let entry = match &self.entry {
            Some(entry) => entry.clone(),
            None => {
                let search = match &self.config_search {
                    Some(search) => search.clone(),
                    None if self.config_path.is_some() => SearchPaths::new(Vec::new()),
                    None => SearchPaths::config_files()?,
                };
                resolve_connection_config(&self.connection_name, self.config_path.as_deref(), &search)?
            }
        };

        let env_search = match &self.env_search {
            Some(search) => search.clone(),
            None => SearchPaths::env_files()?,
        };
        build_connection_descriptor(&self.connection_name, &entry, &env_search)
    }

    /// Resolves the descriptor and opens the session.
    pub fn connect(self) -> Result<Connector> {
        let descriptor = self.resolve()?;
        let session = open_session(&descriptor)?;
        info!(connection = %self.connection_name, url = %descriptor, "connected");
        Ok(Connector::with_session(self.connection_name, descriptor, session))
    }
}

/// Rolls the transaction back on drop unless it was committed or rolled back.
struct TransactionScope<'s> {
    session: &'s mut dyn Session,
    open: bool,
}

impl<'s> TransactionScope<'s> {
    fn begin(session: &'s mut dyn Session) -> Result<Self> {
        session.begin()?;
        debug!(dialect = session.dialect(), "transaction started");
        Ok(TransactionScope { session, open: true })
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.session.execute(sql)
    }

    fn commit(mut self) -> Result<()> {
        self.session.commit()?;
        self.open = false;
        debug!("transaction committed");
        Ok(())
    }

    fn rollback(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        match self.session.rollback() {
            Ok(()) => debug!("transaction rolled back"),
            Err(e) => warn!(error = %e, "rollback failed"),
        }
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

/// A named database connection with one open session.
pub struct Connector {
    connection_name: String,
    descriptor: ConnectionDescriptor,
    session: Box<dyn Session>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("connection_name", &self.connection_name)
            .field("url", &self.descriptor.redacted_url())
            .finish_non_exhaustive()
    }
}

fn require_sql(sql: &str, what: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(SqlconnectError::InvalidArgument(format!(
            "{what} must be non-empty SQL text"
        )));
    }
    Ok(())
}

fn require_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(SqlconnectError::InvalidArgument(
            "SQL file path must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn require_chunk_size(chunk_size: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(chunk_size).ok_or_else(|| {
        SqlconnectError::InvalidArgument("chunk size must be greater than zero".to_string())
    })
}

/// Reads a SQL file fully; a missing or unreadable file is an execution error.
fn read_sql_file(path: &Path) -> Result<String> {
    let full_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    fs::read_to_string(&full_path).map_err(|e| {
        let context = if e.kind() == std::io::ErrorKind::NotFound {
            format!("File not found at: {}", full_path.display())
        } else {
            format!("Failed to read SQL file {}", full_path.display())
        };
        SqlconnectError::execution(context, e.into())
    })
}

impl Connector {
    /// Connects using the default configuration and credential search paths.
    pub fn new(connection_name: &str) -> Result<Self> {
        Self::builder(connection_name).connect()
    }

    pub fn builder(connection_name: &str) -> ConnectorBuilder {
        ConnectorBuilder {
            connection_name: connection_name.to_string(),
            config_path: None,
            entry: None,
            config_search: None,
            env_search: None,
        }
    }

    /// Wraps an already-open session.
    pub fn with_session(
        connection_name: impl Into<String>,
        descriptor: ConnectionDescriptor,
        session: Box<dyn Session>,
    ) -> Self {
        Connector {
            connection_name: connection_name.into(),
            descriptor,
            session,
        }
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Runs a read query and returns every row.
    pub fn query(&mut self, sql: &str) -> Result<Table> {
        require_sql(sql, "query")?;
        self.run_query(sql)
    }

    /// Runs the read query stored in a file.
    pub fn query_file(&mut self, path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref();
        require_path(path)?;
        let sql = read_sql_file(path)?;
        self.run_query(&sql)
    }

    /// Runs a read query, handing rows to `on_chunk` in tables of at most
    /// `chunk_size` rows. An error from `on_chunk` stops the query and is
    /// returned as is.
    pub fn query_chunks<F>(&mut self, sql: &str, chunk_size: usize, mut on_chunk: F) -> Result<()>
    where
        F: FnMut(Table) -> Result<()>,
    {
        require_sql(sql, "query")?;
        let chunk_size = require_chunk_size(chunk_size)?;
        self.run_query_chunks(sql, chunk_size, &mut on_chunk)
    }

    /// Chunked variant of [`Connector::query_file`].
    pub fn query_file_chunks<F>(
        &mut self,
        path: impl AsRef<Path>,
        chunk_size: usize,
        mut on_chunk: F,
    ) -> Result<()>
    where
        F: FnMut(Table) -> Result<()>,
    {
        let path = path.as_ref();
        require_path(path)?;
        let chunk_size = require_chunk_size(chunk_size)?;
        let sql = read_sql_file(path)?;
        self.run_query_chunks(&sql, chunk_size, &mut on_chunk)
    }

    /// Executes a command inside a transaction. Newlines are collapsed to
    /// spaces before execution.
    pub fn execute(&mut self, command: &str) -> Result<()> {
        require_sql(command, "command")?;
        let command = command.replace(['\r', '\n'], " ");
        self.run_command(&command)
    }

    /// Executes the command file as is inside a transaction.
    pub fn execute_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        require_path(path)?;
        let command = read_sql_file(path)?;
        self.run_command(&command)
    }

    /// Bulk-writes `table` into the table `name`.
    ///
    /// Returns the number of rows written when the client reports it.
    pub fn write_table(&mut self, table: &Table, name: &str, options: &WriteOptions) -> Result<Option<u64>> {
        if name.trim().is_empty() {
            return Err(SqlconnectError::InvalidArgument(
                "table name must not be empty".to_string(),
            ));
        }
        table.validate()?;

        let written = self
            .session
            .write_table(table, name, options)
            .map_err(|e| match e {
                SqlconnectError::InvalidArgument(_) => e,
                other => SqlconnectError::execution("Error writing to SQL table", other),
            })?;
        info!(connection = %self.connection_name, table = name, rows = ?written, "table written");
        Ok(written)
    }

    /// Closes the session.
    pub fn close(self) {
        debug!(connection = %self.connection_name, "closing connector");
    }

    fn run_query(&mut self, sql: &str) -> Result<Table> {
        debug!(connection = %self.connection_name, "running query");
        self.session
            .query(sql)
            .map_err(|e| SqlconnectError::execution("Error executing query", e))
    }

    fn run_query_chunks(
        &mut self,
        sql: &str,
        chunk_size: NonZeroUsize,
        on_chunk: &mut dyn FnMut(Table) -> Result<()>,
    ) -> Result<()> {
        debug!(connection = %self.connection_name, chunk_size = chunk_size.get(), "running chunked query");

        // Caller errors pass through untouched; everything else is wrapped.
        let mut callback_failed = false;
        let mut forward = |chunk: Table| -> Result<()> {
            on_chunk(chunk).inspect_err(|_| callback_failed = true)
        };
        let result = self.session.query_chunked(sql, chunk_size, &mut forward);
        match result {
            Err(e) if !callback_failed => Err(SqlconnectError::execution("Error executing query", e)),
            other => other,
        }
    }

    fn run_command(&mut self, command: &str) -> Result<()> {
        debug!(connection = %self.connection_name, "executing command");
        let outcome = TransactionScope::begin(self.session.as_mut()).and_then(|mut scope| {
            match scope.execute(command) {
                Ok(()) => scope.commit(),
                Err(e) => {
                    scope.rollback();
                    Err(e)
                }
            }
        });
        outcome.map_err(|e| {
            warn!(connection = %self.connection_name, error = %e, "command failed");
            SqlconnectError::execution("An error occurred", e)
        })
    }
}
