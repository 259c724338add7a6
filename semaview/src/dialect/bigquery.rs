//! BigQuery dialect implementation.

use crate::sql_ast::Literal;

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct BigQueryDialect;

impl Dialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn escape_quote(&self, ident: &str) -> String {
        ident.replace('`', "\\`")
    }

    fn supports_filtered_aggregates(&self) -> bool {
        false // BigQuery doesn't support FILTER (WHERE) syntax
    }

    fn render_literal(&self, literal: &Literal) -> String {
        match literal {
            Literal::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Literal::Number(n) => n.clone(),
            Literal::Boolean(b) => b.to_string().to_uppercase(),
            Literal::Null => "NULL".to_string(),
        }
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, Some(offset)) => Some(format!("LIMIT {} OFFSET {offset}", i64::MAX)),
            (Some(limit), Some(offset)) => Some(format!("LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => Some(format!("LIMIT {limit}")),
            (None, None) => None,
        }
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::BigQueryDialect {})
    }
}
