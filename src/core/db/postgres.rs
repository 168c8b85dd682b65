/// PostgreSQL Session Module
///
/// Sessions over the synchronous `postgres` client. The descriptor is turned
/// into a libpq-style keyword DSN (`host='..' dbname='..' ...`); connection
/// options are appended verbatim as further keywords.
use super::query::{ChunkBuffer, Table, Value};
use super::write::{Flavor, IfExists, InsertMethod, SqlType, WriteOptions, WritePlan};
use super::Session;
use crate::core::{Result, SqlconnectError};
use crate::descriptor::ConnectionDescriptor;
use postgres::fallible_iterator::FallibleIterator;
use postgres::types::ToSql;
use postgres::types::Type;
use postgres::{Client, Config, NoTls, Row, SimpleQueryMessage, Statement};
use secrecy::{ExposeSecret, SecretString};
use std::num::NonZeroUsize;
use tracing::debug;

/// A session over one PostgreSQL client connection.
pub struct PostgresSession {
    client: Client,
    in_transaction: bool,
}

impl std::fmt::Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession")
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

fn quote_dsn_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Splits `host:port` when the suffix is numeric.
fn split_host_port(host: &str) -> (&str, Option<&str>) {
    match host.rsplit_once(':') {
        Some((name, port))
            if !name.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (name, Some(port))
        }
        _ => (host, None),
    }
}

/// Builds the keyword DSN for the descriptor, credentials included.
pub fn keyword_dsn(descriptor: &ConnectionDescriptor) -> SecretString {
    let (host, port) = split_host_port(&descriptor.host);
    let mut parts = vec![format!("host={}", quote_dsn_value(host))];
    if let Some(port) = port {
        parts.push(format!("port={port}"));
    }
    if let Some(database) = &descriptor.database {
        parts.push(format!("dbname={}", quote_dsn_value(database)));
    }
    if let Some(credentials) = &descriptor.credentials {
        parts.push(format!("user={}", quote_dsn_value(credentials.username())));
        parts.push(format!(
            "password={}",
            quote_dsn_value(credentials.password().expose_secret())
        ));
    }
    for option in &descriptor.options {
        let value = option.value.as_deref().unwrap_or("");
        parts.push(format!("{}={}", option.key, quote_dsn_value(value)));
    }
    SecretString::new(parts.join(" ").into_boxed_str())
}

/// How a result column is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Text,
    Bytea,
    /// No binary decoder; read through the text protocol
    Other,
}

impl ColumnKind {
    fn of(ty: &Type) -> ColumnKind {
        match ty.name() {
            "bool" => ColumnKind::Bool,
            "int2" => ColumnKind::Int2,
            "int4" => ColumnKind::Int4,
            "int8" => ColumnKind::Int8,
            "oid" => ColumnKind::Oid,
            "float4" => ColumnKind::Float4,
            "float8" => ColumnKind::Float8,
            "text" | "varchar" | "bpchar" | "name" | "unknown" => ColumnKind::Text,
            "bytea" => ColumnKind::Bytea,
            _ => ColumnKind::Other,
        }
    }
}

/// Rows fetched per round trip when reading through a cursor.
const TEXT_FETCH_SIZE: usize = 1000;

const CURSOR_NAME: &str = "sqlconnect_cursor";

fn to_value(row: &Row, idx: usize, kind: ColumnKind) -> Result<Value> {
    let value = match kind {
        ColumnKind::Bool => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        ColumnKind::Int2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| Value::Integer(i64::from(v))),
        ColumnKind::Int4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| Value::Integer(i64::from(v))),
        ColumnKind::Int8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer),
        ColumnKind::Oid => row.try_get::<_, Option<u32>>(idx)?.map(|v| Value::Integer(i64::from(v))),
        ColumnKind::Float4 => row.try_get::<_, Option<f32>>(idx)?.map(|v| Value::Real(f64::from(v))),
        ColumnKind::Float8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Real),
        ColumnKind::Text => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
        ColumnKind::Bytea => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Blob),
        ColumnKind::Other => {
            return Err(SqlconnectError::Query(format!(
                "column '{}' has no binary decoder",
                row.columns()[idx].name()
            )))
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn read_row(row: &Row, kinds: &[ColumnKind]) -> Result<Vec<Value>> {
    kinds
        .iter()
        .enumerate()
        .map(|(idx, kind)| to_value(row, idx, *kind))
        .collect()
}

/// Decodes bytea hex output (`\x0a1b..`).
fn decode_bytea_hex(raw: &str) -> Option<Vec<u8>> {
    let hex = raw.strip_prefix("\\x")?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Converts a text-protocol cell. Types without a native `Value` (numeric,
/// dates, timestamps, json, uuid, arrays, ...) keep the server's text.
fn text_value(raw: Option<&str>, kind: ColumnKind) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    let parsed = match kind {
        ColumnKind::Bool => match raw {
            "t" => Some(Value::Bool(true)),
            "f" => Some(Value::Bool(false)),
            _ => None,
        },
        ColumnKind::Int2 | ColumnKind::Int4 | ColumnKind::Int8 | ColumnKind::Oid => {
            raw.parse::<i64>().ok().map(Value::Integer)
        }
        ColumnKind::Float4 | ColumnKind::Float8 => raw.parse::<f64>().ok().map(Value::Real),
        ColumnKind::Bytea => decode_bytea_hex(raw).map(Value::Blob),
        ColumnKind::Text | ColumnKind::Other => None,
    };
    parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
}

/// Boxes a cell as a statement parameter; nulls take the column's type.
fn to_param(value: &Value, ty: &SqlType) -> Box<dyn ToSql + Sync> {
    match value {
        Value::Null => match ty {
            SqlType::Integer => Box::new(None::<i64>),
            SqlType::Real => Box::new(None::<f64>),
            SqlType::Boolean => Box::new(None::<bool>),
            SqlType::Blob => Box::new(None::<Vec<u8>>),
            SqlType::Text | SqlType::Custom(_) => Box::new(None::<String>),
        },
        Value::Bool(b) => Box::new(*b),
        Value::Integer(i) => Box::new(*i),
        Value::Real(f) => Box::new(*f),
        Value::Text(t) => Box::new(t.clone()),
        Value::Blob(b) => Box::new(b.clone()),
    }
}

impl PostgresSession {
    pub fn open(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let config: Config = keyword_dsn(descriptor).expose_secret().parse()?;
        let client = config.connect(NoTls)?;
        debug!(url = %descriptor, "opened PostgreSQL session");
        Ok(PostgresSession {
            client,
            in_transaction: false,
        })
    }

    pub fn from_client(client: Client) -> Self {
        PostgresSession {
            client,
            in_transaction: false,
        }
    }

    fn describe(&mut self, sql: &str) -> Result<(Statement, Vec<String>, Vec<ColumnKind>)> {
        let stmt = self.client.prepare(sql)?;
        let columns = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let kinds = stmt.columns().iter().map(|c| ColumnKind::of(c.type_())).collect();
        Ok((stmt, columns, kinds))
    }

    /// Reads `sql` over the simple query protocol through a server-side
    /// cursor, `fetch_size` rows per round trip. Opens its own transaction
    /// unless one is already in progress.
    fn stream_text(
        &mut self,
        sql: &str,
        kinds: &[ColumnKind],
        fetch_size: usize,
        on_row: &mut dyn FnMut(Vec<Value>) -> Result<()>,
    ) -> Result<()> {
        let owns_transaction = !self.in_transaction;
        if owns_transaction {
            self.client.batch_execute("BEGIN")?;
        }

        let result = self.fetch_through_cursor(sql, kinds, fetch_size, on_row);

        if owns_transaction {
            // Ending the transaction also drops the cursor.
            let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
            let ended = self.client.batch_execute(end);
            result?;
            ended?;
            return Ok(());
        }
        result
    }

    fn fetch_through_cursor(
        &mut self,
        sql: &str,
        kinds: &[ColumnKind],
        fetch_size: usize,
        on_row: &mut dyn FnMut(Vec<Value>) -> Result<()>,
    ) -> Result<()> {
        let body = sql.trim().trim_end_matches(';');
        self.client
            .batch_execute(&format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {body}"))?;

        let fetch = format!("FETCH {fetch_size} FROM {CURSOR_NAME}");
        loop {
            let mut fetched = 0;
            for message in self.client.simple_query(&fetch)? {
                if let SimpleQueryMessage::Row(row) = message {
                    fetched += 1;
                    let values = kinds
                        .iter()
                        .enumerate()
                        .map(|(idx, kind)| row.try_get(idx).map(|raw| text_value(raw, *kind)))
                        .collect::<std::result::Result<Vec<_>, postgres::Error>>()?;
                    on_row(values)?;
                }
            }
            if fetched < fetch_size {
                break;
            }
        }

        self.client.batch_execute(&format!("CLOSE {CURSOR_NAME}"))?;
        Ok(())
    }
}

impl Session for PostgresSession {
    fn dialect(&self) -> &str {
        "postgresql"
    }

    fn query(&mut self, sql: &str) -> Result<Table> {
        let (stmt, columns, kinds) = self.describe(sql)?;
        let mut rows = Vec::new();
        if kinds.contains(&ColumnKind::Other) {
            self.stream_text(sql, &kinds, TEXT_FETCH_SIZE, &mut |row: Vec<Value>| -> Result<()> {
                rows.push(row);
                Ok(())
            })?;
            return Ok(Table::new(columns, rows));
        }

        for row in self.client.query(&stmt, &[])? {
            rows.push(read_row(&row, &kinds)?);
        }
        Ok(Table::new(columns, rows))
    }

    fn query_chunked(
        &mut self,
        sql: &str,
        chunk_size: NonZeroUsize,
        on_chunk: &mut dyn FnMut(Table) -> Result<()>,
    ) -> Result<()> {
        let (stmt, columns, kinds) = self.describe(sql)?;
        let mut buffer = ChunkBuffer::new(columns, chunk_size.get(), on_chunk);

        if kinds.contains(&ColumnKind::Other) {
            self.stream_text(sql, &kinds, chunk_size.get(), &mut |row: Vec<Value>| -> Result<()> {
                buffer.push(row)
            })?;
            return buffer.flush();
        }

        let mut rows = self.client.query_raw(&stmt, Vec::<String>::new())?;
        while let Some(row) = rows.next()? {
            buffer.push(read_row(&row, &kinds)?)?;
        }
        buffer.flush()
    }

    fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(SqlconnectError::Query(
                "Transaction already in progress".to_string(),
            ));
        }
        self.client.batch_execute("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(SqlconnectError::Query("No transaction in progress".to_string()));
        }
        self.client.batch_execute("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(SqlconnectError::Query("No transaction in progress".to_string()));
        }
        self.in_transaction = false;
        self.client.batch_execute("ROLLBACK")?;
        Ok(())
    }

    fn write_table(&mut self, table: &Table, name: &str, options: &WriteOptions) -> Result<Option<u64>> {
        let plan = WritePlan::new(table, name, options, Flavor::Postgres)?;
        let column_types: Vec<SqlType> = plan.column_types().cloned().collect();
        let mut tx = self.client.transaction()?;

        let exists: bool = tx
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = COALESCE($1::text, current_schema()) AND table_name = $2)",
                &[&options.schema.as_deref(), &name],
            )?
            .get(0);

        if exists {
            match options.if_exists {
                IfExists::Fail => return Err(SqlconnectError::TableExists(name.to_string())),
                IfExists::Replace => {
                    tx.batch_execute(&plan.drop_table_sql())?;
                    tx.batch_execute(&plan.create_table_sql())?;
                }
                IfExists::Append => {}
            }
        } else {
            tx.batch_execute(&plan.create_table_sql())?;
        }

        let mut written = 0u64;
        let single = match plan.method() {
            InsertMethod::Single => Some(tx.prepare(&plan.insert_sql(1))?),
            InsertMethod::Multi => None,
        };
        for batch in plan.batches() {
            let params: Vec<Box<dyn ToSql + Sync>> = batch
                .iter()
                .flat_map(|row| row.iter().zip(&column_types).map(|(v, ty)| to_param(v, ty)))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();

            match &single {
                Some(stmt) => {
                    for row_params in refs.chunks(column_types.len()) {
                        written += tx.execute(stmt, row_params)?;
                    }
                }
                None => {
                    written += tx.execute(plan.insert_sql(batch.len()).as_str(), &refs)?;
                }
            }
        }

        tx.commit()?;
        debug!(table = name, rows = written, "wrote table to PostgreSQL");
        Ok(Some(written))
    }
}
