//! DuckDB implementation of the driver traits.
//!
//! All pooled sessions are cloned from one root connection so they share a
//! single database instance (required for `:memory:` databases, and DuckDB
//! refuses to open the same file twice from one process).

use std::sync::Mutex;

use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, Connection};
use quantscan_core::DatabaseConfig;
use serde_json::Value;
use tracing::{info, warn};

use crate::connection::{ConnectionFactory, DbConnection, RowSet, SqlParam};
use crate::error::DriverError;

/// Per-session settings applied once when a connection is created.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub memory_limit: String,
    pub threads: u32,
    pub object_cache: bool,
}

impl SessionSettings {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            memory_limit: config.memory_limit.clone(),
            threads: config.threads.max(1),
            object_cache: config.object_cache,
        }
    }

    fn apply(&self, conn: &mut dyn DbConnection) -> Result<(), DriverError> {
        conn.execute_batch(&format!(
            "SET memory_limit = '{}'; SET threads = {};",
            self.memory_limit.replace('\'', "''"),
            self.threads
        ))?;
        // Legacy knob on recent DuckDB releases; not worth failing a connection over.
        if let Err(e) = conn.execute_batch(&format!(
            "SET enable_object_cache = {};",
            self.object_cache
        )) {
            warn!(error = %e, "could not apply enable_object_cache");
        }
        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&DatabaseConfig::default())
    }
}

/// Opens DuckDB sessions against one shared database.
pub struct DuckDbConnector {
    root: Mutex<Connection>,
    target: String,
    settings: SessionSettings,
}

impl DuckDbConnector {
    /// Open the database described by `config`.
    pub fn open(config: &DatabaseConfig) -> Result<Self, DriverError> {
        let root = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };
        let target = if config.is_in_memory() {
            ":memory:".to_string()
        } else {
            config.path.clone()
        };
        info!(target = %target, "opened DuckDB database");
        Ok(Self {
            root: Mutex::new(root),
            target,
            settings: SessionSettings::from_config(config),
        })
    }

    /// A private in-memory database with default session settings.
    pub fn in_memory() -> Result<Self, DriverError> {
        Self::open(&DatabaseConfig::default())
    }
}

impl ConnectionFactory for DuckDbConnector {
    fn connect(&self) -> Result<Box<dyn DbConnection>, DriverError> {
        let conn = {
            let root = self
                .root
                .lock()
                .map_err(|_| DriverError("root connection lock poisoned".to_string()))?;
            root.try_clone()?
        };
        let mut session = DuckDbConnection { conn };
        self.settings.apply(&mut session)?;
        Ok(Box::new(session))
    }

    fn describe(&self) -> String {
        format!("duckdb:{}", self.target)
    }
}

/// One DuckDB session.
pub struct DuckDbConnection {
    conn: Connection,
}

impl DbConnection for DuckDbConnection {
    fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<RowSet, DriverError> {
        let bound: Vec<DuckValue> = params.iter().map(to_duck_value).collect();
        let mut stmt = self.conn.prepare(sql)?;
        let mut out = Vec::new();
        {
            let mut rows = stmt.query(params_from_iter(bound))?;
            while let Some(row) = rows.next()? {
                let width = row.as_ref().column_count();
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    let v: DuckValue = row.get(i)?;
                    cells.push(to_json(v));
                }
                out.push(cells);
            }
        }
        let columns = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        Ok(RowSet::new(columns, out))
    }

    fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<usize, DriverError> {
        let bound: Vec<DuckValue> = params.iter().map(to_duck_value).collect();
        Ok(self.conn.execute(sql, params_from_iter(bound))?)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), DriverError> {
        Ok(self.conn.execute_batch(sql)?)
    }
}

fn to_duck_value(param: &SqlParam) -> DuckValue {
    match param {
        SqlParam::Text(s) => DuckValue::Text(s.clone()),
        SqlParam::Int(i) => DuckValue::BigInt(*i),
        SqlParam::Float(f) => DuckValue::Double(*f),
        SqlParam::Bool(b) => DuckValue::Boolean(*b),
    }
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::from(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(i as f64)),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::Float(f) => Value::from(f as f64),
        DuckValue::Double(f) => Value::from(f),
        DuckValue::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or(Value::Null),
        DuckValue::Text(s) => Value::String(s),
        other => Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Box<dyn DbConnection> {
        DuckDbConnector::in_memory().unwrap().connect().unwrap()
    }

    #[test]
    fn query_binds_positional_params() {
        let mut conn = session();
        let rows = conn
            .query(
                "SELECT CAST(? AS VARCHAR) AS name, CAST(? AS BIGINT) + 1 AS n, \
                 CAST(? AS DOUBLE) * 2 AS x",
                &[SqlParam::from("abc"), SqlParam::Int(41), SqlParam::Float(1.25)],
            )
            .unwrap();
        assert_eq!(rows.columns, vec!["name", "n", "x"]);
        assert_eq!(rows.get(0, "name").and_then(|v| v.as_str()), Some("abc"));
        assert_eq!(rows.get(0, "n").and_then(|v| v.as_i64()), Some(42));
        assert_eq!(rows.get(0, "x").and_then(|v| v.as_f64()), Some(2.5));
    }

    #[test]
    fn sessions_share_one_database() {
        let connector = DuckDbConnector::in_memory().unwrap();
        let mut a = connector.connect().unwrap();
        let mut b = connector.connect().unwrap();

        a.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2);")
            .unwrap();
        let rows = b.query("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(rows.get(0, "n").and_then(|v| v.as_i64()), Some(2));
    }

    #[test]
    fn execute_reports_affected_rows() {
        let mut conn = session();
        conn.execute_batch("CREATE TABLE t (v INTEGER);").unwrap();
        let n = conn
            .execute(
                "INSERT INTO t VALUES (?), (?), (?)",
                &[SqlParam::Int(1), SqlParam::Int(2), SqlParam::Int(3)],
            )
            .unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn nulls_become_json_null() {
        let mut conn = session();
        let rows = conn.query("SELECT NULL AS missing", &[]).unwrap();
        assert_eq!(rows.get(0, "missing"), Some(&Value::Null));
    }

    #[test]
    fn probe_succeeds_on_live_session() {
        let mut conn = session();
        assert!(conn.probe());
    }

    #[test]
    fn bad_sql_is_a_driver_error() {
        let mut conn = session();
        assert!(conn.query("SELEC nonsense", &[]).is_err());
    }
}
