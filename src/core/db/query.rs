/// Tabular Results Module
///
/// This module provides the in-memory result type shared by every session:
/// ordered column names and ordered rows of typed values.
use crate::core::{Result, SqlconnectError};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort typing of a text field (CSV input and the like).
    ///
    /// Empty text is null, then integer, then finite real, otherwise text.
    /// `nan` and `inf` stay text since SQLite cannot store them as reals.
    pub fn infer(raw: &str) -> Value {
        if raw.is_empty() {
            Value::Null
        } else if let Ok(i) = raw.parse::<i64>() {
            Value::Integer(i)
        } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
            Value::Real(f)
        } else {
            Value::Text(raw.to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(t) => f.write_str(t),
            Value::Blob(b) => write!(f, "<BLOB: {} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Query results: ordered columns, ordered rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Table { columns, rows }
    }

    /// An empty table with the given column names.
    pub fn with_columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Checks the table is rectangular with distinct, non-empty column names.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(SqlconnectError::InvalidArgument(
                "table must have at least one column".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.trim().is_empty() {
                return Err(SqlconnectError::InvalidArgument(
                    "column names must not be empty".to_string(),
                ));
            }
            if !seen.insert(column.as_str()) {
                return Err(SqlconnectError::InvalidArgument(format!(
                    "duplicate column name '{column}'"
                )));
            }
        }

        if let Some((idx, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.columns.len())
        {
            return Err(SqlconnectError::InvalidArgument(format!(
                "row {idx} has {} values but the table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }

        Ok(())
    }
}

/// Accumulates streamed rows and hands them out in fixed-size tables.
pub(crate) struct ChunkBuffer<'f> {
    columns: Vec<String>,
    size: usize,
    rows: Vec<Vec<Value>>,
    on_chunk: &'f mut dyn FnMut(Table) -> Result<()>,
}

impl<'f> ChunkBuffer<'f> {
    pub(crate) fn new(
        columns: Vec<String>,
        size: usize,
        on_chunk: &'f mut dyn FnMut(Table) -> Result<()>,
    ) -> Self {
        ChunkBuffer {
            columns,
            size,
            rows: Vec::with_capacity(size),
            on_chunk,
        }
    }

    pub(crate) fn push(&mut self, row: Vec<Value>) -> Result<()> {
        self.rows.push(row);
        if self.rows.len() >= self.size {
            self.flush()?;
        }
        Ok(())
    }

    /// Emits whatever is buffered; no-op when empty.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let rows = std::mem::replace(&mut self.rows, Vec::with_capacity(self.size));
        (self.on_chunk)(Table::new(self.columns.clone(), rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(
            vec!["id".to_string(), "name".to_string()],
            vec![
                vec![Value::Integer(1), Value::from("Alice")],
                vec![Value::Integer(2), Value::Null],
            ],
        )
    }

    #[test]
    fn test_table_accessors() {
        let table = sample();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column_index("name"), Some(1));
        assert_eq!(table.column("name").unwrap(), vec![&Value::from("Alice"), &Value::Null]);
        assert!(table.column("missing").is_none());
    }

    #[test]
    fn test_validate_rejects_ragged_rows() {
        let mut table = sample();
        assert!(table.validate().is_ok());

        table.push_row(vec![Value::Integer(3)]);
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("row 2 has 1 values"));
    }

    #[test]
    fn test_validate_rejects_bad_columns() {
        assert!(Table::default().validate().is_err());
        assert!(Table::with_columns(["a", "a"]).validate().is_err());
        assert!(Table::with_columns(["a", " "]).validate().is_err());
    }

    #[test]
    fn test_value_inference() {
        assert_eq!(Value::infer(""), Value::Null);
        assert_eq!(Value::infer("42"), Value::Integer(42));
        assert_eq!(Value::infer("4.5"), Value::Real(4.5));
        assert_eq!(Value::infer("Bob"), Value::from("Bob"));
        for raw in ["nan", "NaN", "inf", "-Infinity"] {
            assert_eq!(Value::infer(raw), Value::from(raw));
        }
        assert_eq!(Value::infer("1e3"), Value::Real(1000.0));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_chunk_buffer_sizes() {
        let mut sizes = Vec::new();
        let mut collect = |t: Table| -> Result<()> {
            sizes.push(t.row_count());
            Ok(())
        };
        let mut buffer = ChunkBuffer::new(vec!["n".to_string()], 2, &mut collect);
        for i in 0..5 {
            buffer.push(vec![Value::Integer(i)]).unwrap();
        }
        buffer.flush().unwrap();
        buffer.flush().unwrap();
        drop(buffer);
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, r#"{"columns":["id","name"],"rows":[[1,"Alice"],[2,null]]}"#);
    }
}
