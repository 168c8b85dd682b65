/// Bulk Write Module
///
/// Options for `write_table` and the SQL generation shared by the SQLite and
/// PostgreSQL sessions. Each session binds parameters itself; this module only
/// decides column layout, column types, batching and statement text.
use super::query::{Table, Value};
use crate::core::{Result, SqlconnectError};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

/// What to do when the target table already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfExists {
    /// Fail with `TableExists`
    #[default]
    Fail,
    /// Drop and recreate the table
    Replace,
    /// Insert into the existing table
    Append,
}

/// How rows are turned into INSERT statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertMethod {
    /// One prepared single-row INSERT executed per row
    #[default]
    Single,
    /// One multi-row `VALUES (..), (..)` INSERT per batch
    Multi,
}

/// Column type used when creating a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    /// Emitted verbatim, e.g. `NUMERIC(10, 2)`
    Custom(String),
}

/// SQL flavour differences that matter for table creation and inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Sqlite,
    Postgres,
}

impl SqlType {
    /// Infers a column type from the first non-null value.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> SqlType {
        match values.into_iter().find(|v| !v.is_null()) {
            Some(Value::Bool(_)) => SqlType::Boolean,
            Some(Value::Integer(_)) => SqlType::Integer,
            Some(Value::Real(_)) => SqlType::Real,
            Some(Value::Blob(_)) => SqlType::Blob,
            Some(Value::Text(_)) | Some(Value::Null) | None => SqlType::Text,
        }
    }

    pub fn sql_name(&self, flavor: Flavor) -> &str {
        match (self, flavor) {
            (SqlType::Integer, Flavor::Sqlite) => "INTEGER",
            (SqlType::Integer, Flavor::Postgres) => "BIGINT",
            (SqlType::Real, Flavor::Sqlite) => "REAL",
            (SqlType::Real, Flavor::Postgres) => "DOUBLE PRECISION",
            (SqlType::Text, _) => "TEXT",
            (SqlType::Blob, Flavor::Sqlite) => "BLOB",
            (SqlType::Blob, Flavor::Postgres) => "BYTEA",
            (SqlType::Boolean, _) => "BOOLEAN",
            (SqlType::Custom(name), _) => name,
        }
    }
}

/// Behavioural options for `Connector::write_table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Target schema; the session default when `None`
    pub schema: Option<String>,
    pub if_exists: IfExists,
    /// Write the row position as an extra leading column
    pub index: bool,
    /// Name of the index column (`index` when `None`)
    pub index_label: Option<String>,
    /// Rows per batch; all rows in one batch when `None`
    pub chunk_size: Option<NonZeroUsize>,
    /// Column type overrides by column name
    pub dtype: BTreeMap<String, SqlType>,
    pub method: InsertMethod,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            schema: None,
            if_exists: IfExists::Fail,
            index: true,
            index_label: None,
            chunk_size: None,
            dtype: BTreeMap::new(),
            method: InsertMethod::Single,
        }
    }
}

impl WriteOptions {
    pub fn if_exists(mut self, policy: IfExists) -> Self {
        self.if_exists = policy;
        self
    }

    pub fn index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn index_label(mut self, label: impl Into<String>) -> Self {
        self.index_label = Some(label.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn chunk_size(mut self, size: NonZeroUsize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn dtype(mut self, column: impl Into<String>, ty: SqlType) -> Self {
        self.dtype.insert(column.into(), ty);
        self
    }

    pub fn method(mut self, method: InsertMethod) -> Self {
        self.method = method;
        self
    }
}

/// Quotes an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A validated, ready-to-execute description of one bulk write.
#[derive(Debug)]
pub struct WritePlan<'t> {
    flavor: Flavor,
    qualified_name: String,
    columns: Vec<(String, SqlType)>,
    table: &'t Table,
    index: bool,
    batch_size: usize,
    method: InsertMethod,
}

impl<'t> WritePlan<'t> {
    pub fn new(table: &'t Table, name: &str, options: &WriteOptions, flavor: Flavor) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(SqlconnectError::InvalidArgument(
                "table name must not be empty".to_string(),
            ));
        }
        table.validate()?;

        let mut columns = Vec::with_capacity(table.columns.len() + 1);
        if options.index {
            let label = options.index_label.clone().unwrap_or_else(|| "index".to_string());
            if table.column_index(&label).is_some() {
                return Err(SqlconnectError::InvalidArgument(format!(
                    "index label '{label}' collides with a data column"
                )));
            }
            let ty = options.dtype.get(&label).cloned().unwrap_or(SqlType::Integer);
            columns.push((label, ty));
        }
        for (idx, column) in table.columns.iter().enumerate() {
            let ty = match options.dtype.get(column) {
                Some(ty) => ty.clone(),
                None => SqlType::infer(table.rows.iter().map(|row| &row[idx])),
            };
            columns.push((column.clone(), ty));
        }

        let qualified_name = match &options.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
            None => quote_ident(name),
        };
        let batch_size = options
            .chunk_size
            .map(NonZeroUsize::get)
            .unwrap_or_else(|| table.rows.len().max(1));

        Ok(WritePlan {
            flavor,
            qualified_name,
            columns,
            table,
            index: options.index,
            batch_size,
            method: options.method,
        })
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn column_types(&self) -> impl Iterator<Item = &SqlType> {
        self.columns.iter().map(|(_, ty)| ty)
    }

    pub fn method(&self) -> InsertMethod {
        self.method
    }

    pub fn row_count(&self) -> usize {
        self.table.rows.len()
    }

    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_name(self.flavor)))
            .collect();
        format!("CREATE TABLE {} ({})", self.qualified_name, columns.join(", "))
    }

    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE {}", self.qualified_name)
    }

    /// INSERT statement text for `row_count` rows.
    pub fn insert_sql(&self, row_count: usize) -> String {
        let width = self.columns.len();
        let names: Vec<String> = self.columns.iter().map(|(name, _)| quote_ident(name)).collect();
        let groups: Vec<String> = (0..row_count)
            .map(|row| {
                let placeholders: Vec<String> = (0..width)
                    .map(|col| self.placeholder(row * width + col + 1))
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.qualified_name,
            names.join(", "),
            groups.join(", ")
        )
    }

    fn placeholder(&self, position: usize) -> String {
        match self.flavor {
            Flavor::Sqlite => format!("?{position}"),
            Flavor::Postgres => format!("${position}"),
        }
    }

    /// Rows to insert, grouped into batches, each row prefixed with its
    /// position when the index column is written.
    pub fn batches(&self) -> impl Iterator<Item = Vec<Vec<Value>>> + '_ {
        let index = self.index;
        self.table
            .rows
            .chunks(self.batch_size)
            .enumerate()
            .map(move |(batch, rows)| {
                rows.iter()
                    .enumerate()
                    .map(|(offset, row)| {
                        let mut values = Vec::with_capacity(row.len() + 1);
                        if index {
                            values.push(Value::Integer((batch * self.batch_size + offset) as i64));
                        }
                        values.extend(row.iter().cloned());
                        values
                    })
                    .collect()
            })
    }
}
