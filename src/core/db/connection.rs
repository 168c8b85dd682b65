/// SQLite Session Module
///
/// This module provides the rusqlite-backed session: connection setup from a
/// descriptor, transaction state tracking and row conversion.
use super::query::{ChunkBuffer, Table, Value};
use super::write::{Flavor, IfExists, InsertMethod, WriteOptions, WritePlan};
use super::Session;
use crate::core::{Result, SqlconnectError};
use crate::descriptor::ConnectionDescriptor;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::debug;

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    #[default]
    Autocommit,
    /// Transaction in progress
    Transaction,
}

/// A session over a single SQLite connection.
#[derive(Debug)]
pub struct SqliteSession {
    connection: Connection,
    /// Path to the database file (None for in-memory databases)
    path: Option<PathBuf>,
    transaction_state: TransactionState,
}

impl SqliteSession {
    /// Opens the database named by the descriptor.
    ///
    /// `host` is the database file (or `:memory:`); a `database` value is
    /// joined onto it as a file name. Options are applied as
    /// `PRAGMA key = value`.
    pub fn open(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let path = match &descriptor.database {
            Some(database) if descriptor.host == ":memory:" => {
                return Err(SqlconnectError::InvalidConfig(format!(
                    "in-memory SQLite host cannot be combined with database '{database}'"
                )))
            }
            Some(database) => PathBuf::from(&descriptor.host).join(database),
            None => PathBuf::from(&descriptor.host),
        };
        let connection = Connection::open(&path)?;

        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        for option in &descriptor.options {
            let pragma = match &option.value {
                Some(value) => format!("PRAGMA {} = {};", option.key, value),
                None => format!("PRAGMA {};", option.key),
            };
            connection.execute_batch(&pragma)?;
        }

        let in_memory = path.as_os_str() == ":memory:";
        debug!(path = %path.display(), "opened SQLite session");
        Ok(SqliteSession {
            connection,
            path: if in_memory { None } else { Some(path) },
            transaction_state: TransactionState::Autocommit,
        })
    }

    /// Wraps an existing connection.
    pub fn from_connection(connection: Connection) -> Self {
        SqliteSession {
            connection,
            path: None,
            transaction_state: TransactionState::Autocommit,
        }
    }

    /// Gets the database path (None for in-memory databases)
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn table_exists(connection: &Connection, schema: Option<&str>, name: &str) -> Result<bool> {
        let master = match schema {
            Some(schema) => format!("{}.sqlite_master", super::write::quote_ident(schema)),
            None => "sqlite_master".to_string(),
        };
        let sql = format!("SELECT 1 FROM {master} WHERE type = 'table' AND name = ?1");
        let found = connection
            .query_row(&sql, [name], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

/// Converts a SQLite value into a table cell
fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

fn read_row(row: &rusqlite::Row<'_>, column_count: usize) -> rusqlite::Result<Vec<Value>> {
    (0..column_count)
        .map(|i| row.get_ref(i).map(to_value))
        .collect()
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*b))),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl Session for SqliteSession {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    fn query(&mut self, sql: &str) -> Result<Table> {
        let mut stmt = self.connection.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();

        let rows = stmt
            .query_map([], |row| read_row(row, column_count))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Table::new(columns, rows))
    }

    fn query_chunked(
        &mut self,
        sql: &str,
        chunk_size: NonZeroUsize,
        on_chunk: &mut dyn FnMut(Table) -> Result<()>,
    ) -> Result<()> {
        let mut stmt = self.connection.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();

        let mut buffer = ChunkBuffer::new(columns, chunk_size.get(), on_chunk);
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            buffer.push(read_row(row, column_count)?)?;
        }
        buffer.flush()
    }

    fn begin(&mut self) -> Result<()> {
        if self.transaction_state == TransactionState::Transaction {
            return Err(SqlconnectError::Query(
                "Transaction already in progress".to_string(),
            ));
        }
        // A failed ROLLBACK can leave SQLite inside the abandoned transaction.
        if !self.connection.is_autocommit() {
            self.connection.execute_batch("ROLLBACK")?;
        }
        self.connection.execute_batch("BEGIN")?;
        self.transaction_state = TransactionState::Transaction;
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.connection.execute_batch(sql)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.transaction_state != TransactionState::Transaction {
            return Err(SqlconnectError::Query("No transaction in progress".to_string()));
        }
        self.connection.execute_batch("COMMIT")?;
        self.transaction_state = TransactionState::Autocommit;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.transaction_state != TransactionState::Transaction {
            return Err(SqlconnectError::Query("No transaction in progress".to_string()));
        }
        self.transaction_state = TransactionState::Autocommit;
        // SQLite may already have rolled back on its own (e.g. SQLITE_FULL).
        if !self.connection.is_autocommit() {
            self.connection.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn write_table(&mut self, table: &Table, name: &str, options: &WriteOptions) -> Result<Option<u64>> {
        let plan = WritePlan::new(table, name, options, Flavor::Sqlite)?;
        let tx = self.connection.transaction()?;

        if Self::table_exists(&tx, options.schema.as_deref(), name)? {
            match options.if_exists {
                IfExists::Fail => return Err(SqlconnectError::TableExists(name.to_string())),
                IfExists::Replace => {
                    tx.execute_batch(&plan.drop_table_sql())?;
                    tx.execute_batch(&plan.create_table_sql())?;
                }
                IfExists::Append => {}
            }
        } else {
            tx.execute_batch(&plan.create_table_sql())?;
        }

        let mut written = 0u64;
        match plan.method() {
            InsertMethod::Single => {
                let mut stmt = tx.prepare(&plan.insert_sql(1))?;
                for batch in plan.batches() {
                    for row in &batch {
                        stmt.execute(params_from_iter(row.iter()))?;
                        written += 1;
                    }
                }
            }
            InsertMethod::Multi => {
                for batch in plan.batches() {
                    let sql = plan.insert_sql(batch.len());
                    tx.execute(&sql, params_from_iter(batch.iter().flatten()))?;
                    written += batch.len() as u64;
                }
            }
        }

        tx.commit()?;
        debug!(table = name, rows = written, "wrote table to SQLite");
        Ok(Some(written))
    }
}
