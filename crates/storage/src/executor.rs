use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::connection::{render_params, RowSet, SqlParam};
use crate::error::{DriverError, QueryExecutionError, StorageError};
use crate::pool::ConnectionPool;

/// Runs statements against pooled connections.
///
/// Every call holds exactly one connection for its duration and returns it
/// on every exit path.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
}

impl QueryExecutor {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run a row-producing query.
    pub fn run_query(&self, sql: &str, params: &[SqlParam]) -> Result<RowSet, StorageError> {
        let start = Instant::now();
        let mut conn = self.pool.acquire_scoped()?;
        let rows = conn
            .query(sql, params)
            .map_err(|e| self.failure(sql, params, e))?;
        debug!(
            conn_id = conn.id(),
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query complete"
        );
        Ok(rows)
    }

    /// Run a statement and return the affected row count.
    pub fn run_command(&self, sql: &str, params: &[SqlParam]) -> Result<usize, StorageError> {
        let mut conn = self.pool.acquire_scoped()?;
        let affected = conn
            .execute(sql, params)
            .map_err(|e| self.failure(sql, params, e))?;
        debug!(conn_id = conn.id(), affected, "command complete");
        Ok(affected)
    }

    /// Run parameterless statements (DDL).
    pub fn run_batch(&self, sql: &str) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire_scoped()?;
        conn.execute_batch(sql)
            .map_err(|e| self.failure(sql, &[], e))?;
        Ok(())
    }

    fn failure(&self, sql: &str, params: &[SqlParam], cause: DriverError) -> StorageError {
        let err = QueryExecutionError::new(sql, &render_params(params), cause);
        error!(
            query = %err.query,
            params = %err.params,
            error = %err.source,
            "query execution failed"
        );
        StorageError::Query(err)
    }
}
