//! SQLite dialect implementation.

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn default_schema(&self) -> Option<&str> {
        Some("main")
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
            (None, Some(offset)) => Some(format!("LIMIT -1 OFFSET {offset}")),
            (Some(limit), Some(offset)) => Some(format!("LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => Some(format!("LIMIT {limit}")),
            (None, None) => None,
        }
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::SQLiteDialect {})
    }
}
