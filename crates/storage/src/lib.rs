pub mod cache;
pub mod connection;
pub mod duckdb_driver;
pub mod error;
pub mod executor;
pub mod pool;
pub mod schema;

use std::sync::Arc;

use tracing::info;

pub use cache::{CacheStats, ResultCache};
pub use connection::{render_params, ConnectionFactory, DbConnection, RowSet, SqlParam};
pub use duckdb_driver::{DuckDbConnector, SessionSettings};
pub use error::{DriverError, PoolError, QueryExecutionError, StorageError};
pub use executor::QueryExecutor;
pub use pool::{ConnectionPool, PoolGuard, PoolStats, PooledConnection};
pub use schema::{MarketBar, SchemaConfig, SchemaManager};

/// Database access wired from config: one pool, one executor, one schema
/// manager, all sharing the same connections.
pub struct StorageEngine {
    pub pool: Arc<ConnectionPool>,
    pub executor: QueryExecutor,
    pub schema: Arc<SchemaManager>,
}

impl StorageEngine {
    /// Open the configured DuckDB database. No connection is created until
    /// first use.
    pub fn from_config(config: &quantscan_core::DatabaseConfig) -> Result<Self, StorageError> {
        let connector = DuckDbConnector::open(config)
            .map_err(|e| StorageError::Pool(PoolError::Connect(e)))?;
        info!(target_db = %connector.describe(), "storage engine ready");
        Ok(Self::with_factory(
            Arc::new(connector),
            config.max_connections,
            SchemaConfig::from_database_config(config),
        ))
    }

    /// Wire the stack over any connection factory.
    pub fn with_factory(
        factory: Arc<dyn ConnectionFactory>,
        max_connections: usize,
        schema: SchemaConfig,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(factory, max_connections));
        let executor = QueryExecutor::new(pool.clone());
        let schema = Arc::new(SchemaManager::new(executor.clone(), schema));
        Self {
            pool,
            executor,
            schema,
        }
    }

    /// Close every pooled connection.
    pub fn close(&self) {
        self.pool.close_all();
    }
}
