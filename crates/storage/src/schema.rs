//! One-time creation of the bar table, its index and the optional dataset view.

use std::sync::Mutex;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::connection::SqlParam;
use crate::error::StorageError;
use crate::executor::QueryExecutor;

/// Rows per multi-row INSERT in [`SchemaManager::insert_bars`].
const INSERT_CHUNK: usize = 256;

/// Where rule queries read bars from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaConfig {
    /// Persisted table name.
    pub source_table: String,
    /// Optional Parquet glob blended into a union view.
    pub dataset_glob: Option<String>,
}

impl SchemaConfig {
    pub fn from_database_config(config: &quantscan_core::DatabaseConfig) -> Self {
        Self {
            source_table: config.source_table.clone(),
            dataset_glob: config.dataset_glob.clone(),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            source_table: "market_data".to_string(),
            dataset_glob: None,
        }
    }
}

/// One intraday OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

pub struct SchemaManager {
    executor: QueryExecutor,
    config: SchemaConfig,
    initialized: Mutex<bool>,
}

impl SchemaManager {
    pub fn new(executor: QueryExecutor, config: SchemaConfig) -> Self {
        Self {
            executor,
            config,
            initialized: Mutex::new(false),
        }
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock().expect("schema init lock poisoned")
    }

    /// Relation rule queries select from: the union view when a dataset
    /// glob is configured, the persisted table otherwise.
    pub fn source_relation(&self) -> String {
        match self.config.dataset_glob {
            Some(_) => self.view_name(),
            None => self.config.source_table.clone(),
        }
    }

    fn view_name(&self) -> String {
        format!("{}_all", self.config.source_table)
    }

    fn index_name(&self) -> String {
        format!("idx_{}_symbol_ts", self.config.source_table)
    }

    /// Create the table, index and view if missing. Runs its DDL at most
    /// once per manager; concurrent callers wait for the first to finish.
    /// An existing partial schema is completed rather than recreated.
    pub fn ensure_initialized(&self) -> Result<(), StorageError> {
        let mut done = self.initialized.lock().expect("schema init lock poisoned");
        if *done {
            return Ok(());
        }

        let table = &self.config.source_table;
        if !is_identifier(table) {
            return Err(StorageError::Schema(format!(
                "invalid source table name '{}'",
                table
            )));
        }

        let tables = self
            .executor
            .run_query(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = 'main'",
                &[],
            )
            .map_err(into_schema_error)?
            .first_column_strings();

        if tables.iter().any(|t| t == table) {
            info!(table = %table, "source table already present");
        } else {
            self.executor
                .run_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        symbol VARCHAR NOT NULL,
                        timestamp TIMESTAMP NOT NULL,
                        open DOUBLE,
                        high DOUBLE,
                        low DOUBLE,
                        close DOUBLE,
                        volume BIGINT
                    );"
                ))
                .map_err(into_schema_error)?;
            info!(table = %table, "created source table");
        }

        let index = self.index_name();
        let indexes = self
            .executor
            .run_query(
                "SELECT index_name FROM duckdb_indexes() WHERE table_name = ?",
                &[SqlParam::from(table.as_str())],
            )
            .map_err(into_schema_error)?
            .first_column_strings();

        if !indexes.iter().any(|i| i == &index) {
            self.executor
                .run_batch(&format!(
                    "CREATE INDEX IF NOT EXISTS {index} ON {table} (symbol, timestamp);"
                ))
                .map_err(into_schema_error)?;
            info!(index = %index, "created index");
        }

        if let Some(glob) = &self.config.dataset_glob {
            let view = self.view_name();
            self.executor
                .run_batch(&format!(
                    "CREATE OR REPLACE VIEW {view} AS
                        SELECT symbol, timestamp, open, high, low, close, volume FROM {table}
                        UNION ALL
                        SELECT symbol, CAST(timestamp AS TIMESTAMP), open, high, low, close,
                               CAST(volume AS BIGINT)
                        FROM read_parquet('{}');",
                    glob.replace('\'', "''")
                ))
                .map_err(into_schema_error)?;
            info!(view = %view, glob = %glob, "registered dataset view");
        }

        *done = true;
        Ok(())
    }

    /// Append bars to the persisted table.
    ///
    /// Seeding helper for test fixtures and local datasets. Scans never
    /// write through it.
    pub fn insert_bars(&self, bars: &[MarketBar]) -> Result<usize, StorageError> {
        let table = &self.config.source_table;
        let mut inserted = 0;
        for chunk in bars.chunks(INSERT_CHUNK) {
            let placeholders =
                vec!["(?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let mut params = Vec::with_capacity(chunk.len() * 7);
            for bar in chunk {
                params.push(SqlParam::from(bar.symbol.as_str()));
                params.push(SqlParam::Text(
                    bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                ));
                params.push(SqlParam::Float(bar.open));
                params.push(SqlParam::Float(bar.high));
                params.push(SqlParam::Float(bar.low));
                params.push(SqlParam::Float(bar.close));
                params.push(SqlParam::Int(bar.volume));
            }
            inserted += self.executor.run_command(
                &format!(
                    "INSERT INTO {table} (symbol, timestamp, open, high, low, close, volume) \
                     VALUES {placeholders}"
                ),
                &params,
            )?;
        }
        if inserted == 0 && !bars.is_empty() {
            warn!(table = %table, "insert reported zero rows");
        }
        Ok(inserted)
    }
}

fn into_schema_error(e: StorageError) -> StorageError {
    match e {
        StorageError::Query(q) => StorageError::Schema(q.to_string()),
        other => other,
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duckdb_driver::DuckDbConnector;
    use crate::pool::ConnectionPool;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn executor() -> QueryExecutor {
        let connector = Arc::new(DuckDbConnector::in_memory().unwrap());
        QueryExecutor::new(Arc::new(ConnectionPool::new(connector, 2)))
    }

    fn bar(symbol: &str, h: u32, m: u32, close: f64) -> MarketBar {
        MarketBar {
            symbol: symbol.to_string(),
            timestamp: NaiveDate::from_ymd_opt(2025, 9, 8)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn initializes_once_and_is_idempotent() {
        let exec = executor();
        let schema = SchemaManager::new(exec.clone(), SchemaConfig::default());
        schema.ensure_initialized().unwrap();
        schema.ensure_initialized().unwrap();
        assert!(schema.is_initialized());

        let indexes = exec
            .run_query(
                "SELECT index_name FROM duckdb_indexes() WHERE table_name = 'market_data'",
                &[],
            )
            .unwrap()
            .first_column_strings();
        assert_eq!(indexes, vec!["idx_market_data_symbol_ts"]);
    }

    #[test]
    fn completes_partial_schema() {
        let exec = executor();
        exec.run_batch(
            "CREATE TABLE market_data (symbol VARCHAR NOT NULL, timestamp TIMESTAMP NOT NULL,
             open DOUBLE, high DOUBLE, low DOUBLE, close DOUBLE, volume BIGINT);
             INSERT INTO market_data
             VALUES ('AAA', TIMESTAMP '2025-09-08 09:15:00', 1, 1, 1, 1, 10);",
        )
        .unwrap();

        let schema = SchemaManager::new(exec.clone(), SchemaConfig::default());
        schema.ensure_initialized().unwrap();

        // Existing rows survive and the index now exists.
        let rows = exec
            .run_query("SELECT COUNT(*) AS n FROM market_data", &[])
            .unwrap();
        assert_eq!(rows.get(0, "n").and_then(|v| v.as_i64()), Some(1));
        let indexes = exec
            .run_query("SELECT index_name FROM duckdb_indexes()", &[])
            .unwrap()
            .first_column_strings();
        assert!(indexes.contains(&"idx_market_data_symbol_ts".to_string()));
    }

    #[test]
    fn insert_bars_round_trips_through_table() {
        let exec = executor();
        let schema = SchemaManager::new(exec.clone(), SchemaConfig::default());
        schema.ensure_initialized().unwrap();

        let bars = vec![bar("AAA", 9, 15, 100.0), bar("BBB", 9, 16, 50.5)];
        assert_eq!(schema.insert_bars(&bars).unwrap(), 2);

        let rows = exec
            .run_query(
                "SELECT CAST(close AS DOUBLE) AS close FROM market_data WHERE symbol = ?",
                &[SqlParam::from("BBB")],
            )
            .unwrap();
        assert_eq!(rows.get(0, "close").and_then(|v| v.as_f64()), Some(50.5));
    }

    #[test]
    fn insert_bars_spans_several_chunks() {
        let exec = executor();
        let schema = SchemaManager::new(exec.clone(), SchemaConfig::default());
        schema.ensure_initialized().unwrap();

        let bars: Vec<MarketBar> = (0..(INSERT_CHUNK * 2 + 88))
            .map(|i| bar("AAA", 9 + (i / 60) as u32, (i % 60) as u32, 10.0))
            .collect();
        assert_eq!(schema.insert_bars(&bars).unwrap(), bars.len());
        assert_eq!(schema.insert_bars(&[]).unwrap(), 0);

        let rows = exec
            .run_query("SELECT COUNT(*) AS n FROM market_data", &[])
            .unwrap();
        assert_eq!(
            rows.get(0, "n").and_then(|v| v.as_i64()),
            Some(bars.len() as i64)
        );
    }

    #[test]
    fn source_relation_follows_dataset_glob() {
        let exec = executor();
        let plain = SchemaManager::new(exec.clone(), SchemaConfig::default());
        assert_eq!(plain.source_relation(), "market_data");

        let blended = SchemaManager::new(
            exec,
            SchemaConfig {
                source_table: "bars".to_string(),
                dataset_glob: Some("/data/*.parquet".to_string()),
            },
        );
        assert_eq!(blended.source_relation(), "bars_all");
    }

    #[test]
    fn rejects_unsafe_table_name() {
        let schema = SchemaManager::new(
            executor(),
            SchemaConfig {
                source_table: "bars; DROP TABLE x".to_string(),
                dataset_glob: None,
            },
        );
        let err = schema.ensure_initialized().unwrap_err();
        assert!(err.is_resource_error());
        assert!(!schema.is_initialized());
    }
}
