use thiserror::Error;

/// Longest query text kept in an error or log line.
const MAX_QUERY_SNAPSHOT: usize = 512;

/// Longest rendered parameter list kept in an error or log line.
const MAX_PARAMS_SNAPSHOT: usize = 256;

/// Error raised by the underlying database driver, stringified so the
/// pool and executor stay driver-agnostic.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct DriverError(pub String);

impl From<duckdb::Error> for DriverError {
    fn from(e: duckdb::Error) -> Self {
        DriverError(e.to_string())
    }
}

/// Resource-management failures. These indicate deployment misconfiguration
/// rather than bad rule data and are never retried implicitly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("connection pool exhausted ({max} connections in use)")]
    Exhausted { max: usize },

    #[error("connection pool is closed")]
    Closed,

    #[error("failed to open connection: {0}")]
    Connect(DriverError),
}

/// A query or command failed inside the driver.
#[derive(Error, Debug, Clone)]
#[error("query execution failed: {source} (query: {query}; params: {params})")]
pub struct QueryExecutionError {
    /// Truncated query text.
    pub query: String,
    /// Truncated rendering of the bound parameters.
    pub params: String,
    pub source: DriverError,
}

impl QueryExecutionError {
    pub fn new(query: &str, params: &str, source: DriverError) -> Self {
        Self {
            query: truncate(query, MAX_QUERY_SNAPSHOT),
            params: truncate(params, MAX_PARAMS_SNAPSHOT),
            source,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Query(#[from] QueryExecutionError),

    #[error("schema initialization failed: {0}")]
    Schema(String),
}

impl StorageError {
    /// Pool and schema failures signal a broken deployment, not a bad rule.
    pub fn is_resource_error(&self) -> bool {
        matches!(self, StorageError::Pool(_) | StorageError::Schema(_))
    }
}

/// Collapse whitespace and cut `s` to at most `max` characters.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_collapses_whitespace() {
        assert_eq!(truncate("SELECT  1\n  FROM   t", 100), "SELECT 1 FROM t");
    }

    #[test]
    fn truncate_cuts_long_text() {
        let long = "x".repeat(600);
        let cut = truncate(&long, 512);
        assert_eq!(cut.len(), 515);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn query_error_keeps_snapshot_short() {
        let query = format!("SELECT {} FROM market_data", "close, ".repeat(200));
        let err = QueryExecutionError::new(&query, "[]", DriverError("boom".into()));
        assert!(err.query.len() <= MAX_QUERY_SNAPSHOT + 3);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn resource_classification() {
        assert!(StorageError::Pool(PoolError::Closed).is_resource_error());
        assert!(StorageError::Schema("x".into()).is_resource_error());
        let q = QueryExecutionError::new("SELECT 1", "[]", DriverError("bad".into()));
        assert!(!StorageError::Query(q).is_resource_error());
    }
}
