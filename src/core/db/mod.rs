/// Database Module
///
/// This module provides the database session layer used by the `Connector`
/// facade, organized into focused submodules:
///
/// - **SQLite sessions** (`connection.rs`): rusqlite-backed session with transaction state
/// - **PostgreSQL sessions** (`postgres.rs`): sessions over the synchronous `postgres` client
/// - **Tabular results** (`query.rs`): `Table` and `Value`
/// - **Bulk writes** (`write.rs`): `WriteOptions` and shared INSERT/CREATE generation
///
/// ## Error Handling
///
/// Sessions report raw client errors (`SqlconnectError::Database`,
/// `SqlconnectError::Postgres`); the facade wraps them as execution errors.
pub mod connection;
pub mod postgres;
pub mod query;
pub mod write;

pub use connection::{SqliteSession, TransactionState};
pub use postgres::PostgresSession;
pub use query::{Table, Value};
pub use write::{IfExists, InsertMethod, SqlType, WriteOptions};

use crate::core::{Result, SqlconnectError};
use crate::descriptor::ConnectionDescriptor;
use std::num::NonZeroUsize;

/// The capabilities the facade needs from a database client.
///
/// `begin`/`execute`/`commit`/`rollback` give the caller manual control of
/// the transaction boundary; `query` and `query_chunked` run reads outside of
/// it. Implementations are used from one thread at a time.
pub trait Session {
    /// Dialect name, for logging.
    fn dialect(&self) -> &str;

    /// Runs a read query and materializes every row.
    fn query(&mut self, sql: &str) -> Result<Table>;

    /// Runs a read query, streaming rows to `on_chunk` in tables of at most
    /// `chunk_size` rows. The cursor is released before returning, whether
    /// the query, the row conversion or the callback failed.
    fn query_chunked(
        &mut self,
        sql: &str,
        chunk_size: NonZeroUsize,
        on_chunk: &mut dyn FnMut(Table) -> Result<()>,
    ) -> Result<()>;

    fn begin(&mut self) -> Result<()>;

    /// Executes one or more statements without returning rows.
    fn execute(&mut self, sql: &str) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Bulk-inserts `table` into `name`, returning the number of rows written.
    fn write_table(&mut self, table: &Table, name: &str, options: &WriteOptions) -> Result<Option<u64>>;
}

/// Opens the session matching the descriptor's dialect.
pub fn open_session(descriptor: &ConnectionDescriptor) -> Result<Box<dyn Session>> {
    match descriptor.dialect.to_ascii_lowercase().as_str() {
        "sqlite" => Ok(Box::new(SqliteSession::open(descriptor)?)),
        "postgresql" | "postgres" => Ok(Box::new(PostgresSession::open(descriptor)?)),
        other => Err(SqlconnectError::UnsupportedDialect(other.to_string())),
    }
}
