//! DuckDB backend implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

use crate::config::ResolvedDatasourceConfig;
use crate::dialect::{Dialect, DuckDbDialect};
use crate::error::{Result, SemaviewError};
use crate::executor::{ColumnMeta, QueryResult};

use super::{BackendConnection, IntrospectionQueries};

const INTROSPECTION: IntrospectionQueries = IntrospectionQueries {
    views: "SELECT schema_name AS view_schema, view_name, sql AS view_sql \
            FROM duckdb_views() WHERE NOT internal \
            ORDER BY schema_name, view_name",
    columns: "SELECT c.table_schema, c.table_name, c.column_name \
              FROM information_schema.columns c \
              JOIN information_schema.tables t \
                ON t.table_catalog = c.table_catalog \
               AND t.table_schema = c.table_schema \
               AND t.table_name = c.table_name \
              WHERE t.table_type = 'BASE TABLE' \
              ORDER BY c.table_schema, c.table_name, c.ordinal_position",
    foreign_keys: "SELECT schema_name AS table_schema, table_name, \
                   UNNEST(constraint_column_names) AS column_name, \
                   schema_name AS referenced_schema, referenced_table, \
                   UNNEST(referenced_column_names) AS referenced_column \
                   FROM duckdb_constraints() \
                   WHERE constraint_type = 'FOREIGN KEY'",
};

/// DuckDB connection implementing the unified backend trait.
#[derive(Clone)]
pub struct DuckDbConnection {
    database_path: PathBuf,
    dialect: DuckDbDialect,
    limiter: Arc<Semaphore>,
    pool: Arc<Mutex<Vec<duckdb::Connection>>>,
}

impl DuckDbConnection {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        tracing::info!(path = %path.display(), max_concurrency = 16, "creating DuckDB connection");
        Self {
            database_path: path,
            dialect: DuckDbDialect,
            limiter: Arc::new(Semaphore::new(16)),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_config<P: AsRef<Path>>(path: P, config: &ResolvedDatasourceConfig) -> Self {
        Self::new(path).with_max_concurrency(config.duckdb.max_concurrency)
    }

    /// Configure maximum concurrent executions.
    pub fn with_max_concurrency(mut self, max_in_flight: usize) -> Self {
        tracing::debug!(max_concurrency = max_in_flight, "configuring DuckDB concurrency");
        self.limiter = Arc::new(Semaphore::new(max_in_flight.max(1)));
        self
    }

    /// Run statements that return no rows (DDL, loads).
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>> {
        if self.limiter.available_permits() == 0 {
            tracing::debug!("all DuckDB slots in use, waiting for permit");
        }
        self.limiter
            .acquire()
            .await
            .map_err(|e| SemaviewError::Execution(format!("limiter closed: {e}")))
    }

    async fn checkout_connection(&self) -> Result<duckdb::Connection> {
        let mut guard = self.pool.lock().await;
        if let Some(conn) = guard.pop() {
            let pool_size = guard.len();
            drop(guard);
            tracing::trace!(pool_remaining = pool_size, "reusing pooled DuckDB connection");
            return Ok(conn);
        }
        drop(guard);
        tracing::debug!(path = %self.database_path.display(), "opening new DuckDB connection");
        duckdb::Connection::open(self.database_path.clone())
            .map_err(|e| SemaviewError::Execution(format!("open duckdb: {e}")))
    }

    /// Run `work` on a pooled connection off the async runtime. The connection
    /// goes back to the pool only when `work` succeeds.
    async fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection) -> Result<T> + Send + 'static,
    {
        let _permit = self.acquire_slot().await?;
        let conn = self.checkout_connection().await?;
        let (value, conn) = tokio::task::spawn_blocking(move || -> Result<(T, duckdb::Connection)> {
            let value = work(&conn)?;
            Ok((value, conn))
        })
        .await
        .map_err(|e| SemaviewError::Execution(format!("task join error: {e}")))??;

        self.pool.lock().await.push(conn);
        Ok(value)
    }
}

#[async_trait]
impl BackendConnection for DuckDbConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn introspection(&self) -> IntrospectionQueries {
        INTROSPECTION
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        let sql = sql.to_string();
        tracing::trace!(sql = %sql, "executing DuckDB query");
        self.with_connection(move |conn| {
            let start = Instant::now();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows_iter = stmt.query([])?;
            let stmt_ref = rows_iter
                .as_ref()
                .ok_or_else(|| SemaviewError::Execution("statement missing".to_string()))?;
            let mut column_names = Vec::new();
            for idx in 0..stmt_ref.column_count() {
                let name = stmt_ref
                    .column_name(idx)
                    .map_err(|e| SemaviewError::Execution(e.to_string()))?;
                column_names.push(name.to_string());
            }
            let mut rows = Vec::new();
            while let Some(row) = rows_iter.next()? {
                let mut map = serde_json::Map::new();
                for (idx, name) in column_names.iter().enumerate() {
                    let value = crate::executor::duck_value_to_json(row.get_ref(idx)?.to_owned());
                    map.insert(name.clone(), value);
                }
                rows.push(map);
            }

            let columns: Vec<_> = column_names
                .into_iter()
                .map(|name| ColumnMeta { name })
                .collect();
            tracing::debug!(
                rows = rows.len(),
                columns = columns.len(),
                ms = start.elapsed().as_millis(),
                "duckdb execute_sql"
            );
            Ok(QueryResult { columns, rows })
        })
        .await
    }
}
