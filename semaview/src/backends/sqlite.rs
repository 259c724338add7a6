//! SQLite backend implementation.
//!
//! Every pooled connection opens the same database file, so in-memory
//! databases are not supported.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

use crate::config::ResolvedDatasourceConfig;
use crate::dialect::{Dialect, SqliteDialect};
use crate::error::{Result, SemaviewError};
use crate::executor::{sqlite_value_to_json, ColumnMeta, QueryResult};

use super::{BackendConnection, IntrospectionQueries};

const INTROSPECTION: IntrospectionQueries = IntrospectionQueries {
    views: "SELECT 'main' AS view_schema, name AS view_name, sql AS view_sql \
            FROM sqlite_master WHERE type = 'view' ORDER BY name",
    columns: "SELECT 'main' AS table_schema, m.name AS table_name, p.name AS column_name \
              FROM sqlite_master m JOIN pragma_table_info(m.name) p \
              WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
              ORDER BY m.name, p.cid",
    foreign_keys: "SELECT 'main' AS table_schema, m.name AS table_name, f.\"from\" AS column_name, \
                   'main' AS referenced_schema, f.\"table\" AS referenced_table, \
                   COALESCE(f.\"to\", (SELECT k.name FROM pragma_table_info(f.\"table\") k WHERE k.pk = 1)) \
                     AS referenced_column \
                   FROM sqlite_master m JOIN pragma_foreign_key_list(m.name) f \
                   WHERE m.type = 'table' \
                   ORDER BY m.name, f.id, f.seq",
};

#[derive(Clone)]
pub struct SqliteConnection {
    database_path: PathBuf,
    dialect: SqliteDialect,
    limiter: Arc<Semaphore>,
    pool: Arc<Mutex<Vec<rusqlite::Connection>>>,
}

impl SqliteConnection {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        tracing::info!(path = %path.display(), max_concurrency = 4, "creating SQLite connection");
        Self {
            database_path: path,
            dialect: SqliteDialect,
            limiter: Arc::new(Semaphore::new(4)),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_config<P: AsRef<Path>>(path: P, config: &ResolvedDatasourceConfig) -> Self {
        Self::new(path).with_max_concurrency(config.sqlite.max_concurrency)
    }

    pub fn with_max_concurrency(mut self, max_in_flight: usize) -> Self {
        tracing::debug!(max_concurrency = max_in_flight, "configuring SQLite concurrency");
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
            tracing::debug!("all SQLite slots in use, waiting for permit");
        }
        self.limiter
            .acquire()
            .await
            .map_err(|e| SemaviewError::Execution(format!("limiter closed: {e}")))
    }

    async fn checkout_connection(&self) -> Result<rusqlite::Connection> {
        if let Some(conn) = self.pool.lock().await.pop() {
            return Ok(conn);
        }
        tracing::debug!(path = %self.database_path.display(), "opening new SQLite connection");
        rusqlite::Connection::open(&self.database_path)
            .map_err(|e| SemaviewError::Execution(format!("open sqlite: {e}")))
    }

    async fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let _permit = self.acquire_slot().await?;
        let conn = self.checkout_connection().await?;
        let (value, conn) =
            tokio::task::spawn_blocking(move || -> Result<(T, rusqlite::Connection)> {
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
impl BackendConnection for SqliteConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn introspection(&self) -> IntrospectionQueries {
        INTROSPECTION
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        let sql = sql.to_string();
        tracing::trace!(sql = %sql, "executing SQLite query");
        self.with_connection(move |conn| {
            let start = Instant::now();
            let mut stmt = conn.prepare(&sql)?;
            let column_names: Vec<String> =
                stmt.column_names().into_iter().map(str::to_string).collect();
            let mut rows_iter = stmt.query([])?;
            let mut rows = Vec::new();
            while let Some(row) = rows_iter.next()? {
                let mut map = serde_json::Map::new();
                for (idx, name) in column_names.iter().enumerate() {
                    map.insert(name.clone(), sqlite_value_to_json(row.get_ref(idx)?));
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
                "sqlite execute_sql"
            );
            Ok(QueryResult { columns, rows })
        })
        .await
    }
}
