//! Driver-facing traits and the value types that cross them.
//!
//! The pool and executor only see [`DbConnection`] / [`ConnectionFactory`],
//! so tests can swap the embedded database for scripted connections.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DriverError;

/// A positional query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Text(s) => write!(f, "'{}'", s),
            SqlParam::Int(i) => write!(f, "{}", i),
            SqlParam::Float(x) => write!(f, "{}", x),
            SqlParam::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        SqlParam::Text(s.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(s: String) -> Self {
        SqlParam::Text(s)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

/// Render a parameter list for logs and error snapshots.
pub fn render_params(params: &[SqlParam]) -> String {
    let parts: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Materialized query result.
///
/// Cells are JSON values; `Value::Null` represents SQL NULL. Every row has
/// the same length as `columns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Zero-based index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at (`row`, `column`), `None` if either is out of range.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Values of the first column, as strings. Handy for catalog lookups.
    pub fn first_column_strings(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.first())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }
}

/// A live database session.
///
/// Implementations are moved between threads by the pool but only ever used
/// by one thread at a time.
pub trait DbConnection: Send {
    /// Run a statement that produces rows.
    fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<RowSet, DriverError>;

    /// Run a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<usize, DriverError>;

    /// Run one or more parameterless statements (DDL, session settings).
    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Cheap round-trip confirming the session is still usable.
    fn probe(&mut self) -> bool {
        self.query("SELECT 1", &[]).is_ok()
    }
}

/// Opens new sessions for the pool. Session settings are applied here,
/// once per connection.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn DbConnection>, DriverError>;

    /// Human-readable target, used in logs.
    fn describe(&self) -> String {
        "database".to_string()
    }
}
