//! MySQL dialect implementation (5.7 feature level: no WITH, no FILTER).

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn supports_cte(&self) -> bool {
        false
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, Some(offset)) => Some(format!("LIMIT {} OFFSET {offset}", u64::MAX)),
            (Some(limit), Some(offset)) => Some(format!("LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => Some(format!("LIMIT {limit}")),
            (None, None) => None,
        }
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::MySqlDialect {})
    }
}
