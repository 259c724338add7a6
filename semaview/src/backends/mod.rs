//! Database backend implementations.
//!
//! Each backend is implemented in its own file and gated behind a feature flag.
//! Backends only introspect and execute; compiling happens in `query_builder`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::config::{ResolvedDatasourceConfig, SemaviewConfig};
use crate::dialect::Dialect;
use crate::error::Result;
use crate::executor::{optional_text, required_text, QueryResult};
use crate::models::Relation;
use crate::schema::{ForeignKey, SchemaSnapshot};

/// Catalog statements a backend runs to build a [`SchemaSnapshot`].
///
/// Result columns are fixed by name:
/// * `views`: `view_schema`, `view_name`, `view_sql`
/// * `columns`: `table_schema`, `table_name`, `column_name` (base tables only)
/// * `foreign_keys`: `table_schema`, `table_name`, `column_name`,
///   `referenced_schema`, `referenced_table`, `referenced_column`
#[derive(Debug, Clone, Copy)]
pub struct IntrospectionQueries {
    pub views: &'static str,
    pub columns: &'static str,
    pub foreign_keys: &'static str,
}

/// Unified interface for all database backends.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    fn dialect(&self) -> &dyn Dialect;
    fn introspection(&self) -> IntrospectionQueries;
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;

    /// View relation -> defining SQL.
    async fn fetch_views(&self) -> Result<Vec<(Relation, String)>> {
        let result = self.execute_sql(self.introspection().views).await?;
        result
            .rows
            .iter()
            .map(|row| {
                let relation = relation(
                    required_text(row, "view_name")?,
                    optional_text(row, "view_schema")?,
                );
                Ok((relation, required_text(row, "view_sql")?))
            })
            .collect()
    }

    /// Base table -> column names, in the order the backend returns them.
    async fn fetch_columns(&self) -> Result<Vec<(Relation, String)>> {
        let result = self.execute_sql(self.introspection().columns).await?;
        result
            .rows
            .iter()
            .map(|row| {
                let table = relation(
                    required_text(row, "table_name")?,
                    optional_text(row, "table_schema")?,
                );
                Ok((table, required_text(row, "column_name")?))
            })
            .collect()
    }

    async fn fetch_foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let result = self.execute_sql(self.introspection().foreign_keys).await?;
        result
            .rows
            .iter()
            .map(|row| {
                Ok(ForeignKey::new(
                    relation(
                        required_text(row, "table_name")?,
                        optional_text(row, "table_schema")?,
                    ),
                    required_text(row, "column_name")?,
                    relation(
                        required_text(row, "referenced_table")?,
                        optional_text(row, "referenced_schema")?,
                    ),
                    required_text(row, "referenced_column")?,
                ))
            })
            .collect()
    }

    /// One introspection pass: views, columns and foreign keys, read concurrently.
    async fn introspect(&self) -> Result<SchemaSnapshot> {
        let start = Instant::now();
        let (views, columns, foreign_keys) = futures::try_join!(
            self.fetch_views(),
            self.fetch_columns(),
            self.fetch_foreign_keys()
        )?;

        let mut snapshot = SchemaSnapshot::new();
        for (view, sql) in views {
            snapshot = snapshot.with_view(view, sql);
        }
        for (table, column) in columns {
            snapshot = snapshot.with_table(table, [column]);
        }
        for fk in foreign_keys {
            snapshot = snapshot.with_foreign_key(fk);
        }

        tracing::debug!(
            dialect = self.dialect().name(),
            views = snapshot.views.len(),
            tables = snapshot.tables.len(),
            foreign_keys = snapshot.foreign_keys.len(),
            ms = start.elapsed().as_millis(),
            "introspected schema"
        );
        Ok(snapshot)
    }
}

fn relation(name: String, schema: Option<String>) -> Relation {
    match schema {
        Some(schema) if !schema.is_empty() => Relation::new(name).with_schema(schema),
        _ => Relation::new(name),
    }
}

/// Minimal connection manager keyed by data source name.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: HashMap<String, Arc<dyn BackendConnection>>,
    config: Option<SemaviewConfig>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SemaviewConfig) -> Self {
        Self {
            connections: HashMap::new(),
            config: Some(config),
        }
    }

    pub fn config(&self) -> Option<&SemaviewConfig> {
        self.config.as_ref()
    }

    /// Resolved configuration for a datasource.
    pub fn config_for(&self, name: &str) -> ResolvedDatasourceConfig {
        match &self.config {
            Some(cfg) => cfg.for_datasource(name),
            None => SemaviewConfig::default().for_datasource(name),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, conn: Arc<dyn BackendConnection>) {
        self.connections.insert(name.into(), conn);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn BackendConnection>> {
        self.connections.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }
}

#[cfg(feature = "duckdb")]
mod duckdb;
#[cfg(feature = "duckdb")]
pub use duckdb::DuckDbConnection;

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnection;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnection;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::error::SemaviewError;
    use crate::executor::ColumnMeta;
    use serde_json::{json, Map, Value};

    struct CannedBackend;

    fn rows(values: Value) -> QueryResult {
        let rows: Vec<Map<String, Value>> = values
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        let columns = rows
            .first()
            .map(|row| {
                row.keys()
                    .map(|name| ColumnMeta { name: name.clone() })
                    .collect()
            })
            .unwrap_or_default();
        QueryResult { columns, rows }
    }

    #[async_trait]
    impl BackendConnection for CannedBackend {
        fn dialect(&self) -> &dyn Dialect {
            &SqliteDialect
        }

        fn introspection(&self) -> IntrospectionQueries {
            IntrospectionQueries {
                views: "views",
                columns: "columns",
                foreign_keys: "fks",
            }
        }

        async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
            Ok(match sql {
                "views" => rows(json!([
                    {"view_schema": "main", "view_name": "revenue", "view_sql": "SELECT SUM(amount) FROM orders"}
                ])),
                "columns" => rows(json!([
                    {"table_schema": "main", "table_name": "orders", "column_name": "id"},
                    {"table_schema": "main", "table_name": "orders", "column_name": "amount"},
                    {"table_schema": "main", "table_name": "customers", "column_name": "id"}
                ])),
                "fks" => rows(json!([
                    {"table_schema": "main", "table_name": "orders", "column_name": "customer_id",
                     "referenced_schema": null, "referenced_table": "customers", "referenced_column": "id"}
                ])),
                _ => return Err(SemaviewError::Execution(format!("unexpected `{sql}`"))),
            })
        }
    }

    #[tokio::test]
    async fn introspection_rows_become_a_snapshot() {
        let snapshot = CannedBackend.introspect().await.unwrap();
        let orders = Relation::new("orders").with_schema("main");
        assert_eq!(
            snapshot.columns(&orders),
            Some(&["id".to_string(), "amount".to_string()][..])
        );
        assert_eq!(snapshot.views.len(), 1);
        assert_eq!(
            snapshot.foreign_keys[0].referenced_table,
            Relation::new("customers")
        );
    }
}
