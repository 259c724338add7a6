//! DuckDB dialect implementation.

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn supports_filtered_aggregates(&self) -> bool {
        true
    }

    fn default_schema(&self) -> Option<&str> {
        Some("main")
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::DuckDbDialect {})
    }
}
