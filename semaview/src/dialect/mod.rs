//! SQL dialect abstractions for different database engines.
//!
//! Dialects are plain values picked when a backend is constructed. They are
//! not feature-gated: the compiler can target any of them without a driver.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::sql_ast::{Aggregation, Literal};

/// Words quoted even when they are otherwise plain identifiers.
static RESERVED_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "between",
        "both", "by", "case", "cast", "check", "collate", "column", "constraint", "create",
        "cross", "current_date", "current_time", "current_timestamp", "current_user", "default",
        "deferrable", "delete", "desc", "distinct", "do", "else", "end", "except", "exists",
        "false", "fetch", "for", "foreign", "from", "full", "grant", "group", "having", "in",
        "index", "initially", "inner", "insert", "intersect", "into", "is", "join", "key",
        "lateral", "leading", "left", "like", "limit", "natural", "not", "null", "offset", "on",
        "only", "or", "order", "outer", "over", "partition", "primary", "qualify", "references",
        "returning", "right", "select", "similar", "some", "symmetric", "table", "then", "to",
        "trailing", "true", "union", "unique", "update", "user", "using", "values", "view",
        "when", "where", "window", "with",
    ]
    .into_iter()
    .collect()
});

pub fn is_reserved_word(ident: &str) -> bool {
    RESERVED_WORDS.contains(ident.to_ascii_lowercase().as_str())
}

/// Dialects render identifiers and primitive expression pieces, and report
/// which constructs the compiler may emit for them.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_char(&self) -> char {
        '"'
    }

    /// Unquoted identifiers fold to lower case (PostgreSQL).
    fn folds_unquoted_to_lower(&self) -> bool {
        false
    }

    fn escape_quote(&self, ident: &str) -> String {
        let q = self.quote_char();
        ident.replace(q, &format!("{q}{q}"))
    }

    /// Quote `ident` only when leaving it bare would change its meaning.
    fn quote_ident(&self, ident: &str) -> String {
        let plain = !ident.is_empty()
            && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !ident.starts_with(|c: char| c.is_ascii_digit())
            && !is_reserved_word(ident)
            && !(self.folds_unquoted_to_lower() && ident.chars().any(|c| c.is_ascii_uppercase()));
        if plain {
            ident.to_string()
        } else {
            let q = self.quote_char();
            format!("{q}{}{q}", self.escape_quote(ident))
        }
    }

    fn supports_filtered_aggregates(&self) -> bool {
        false
    }

    fn supports_cte(&self) -> bool {
        true
    }

    fn default_schema(&self) -> Option<&str> {
        None
    }

    fn default_catalog(&self) -> Option<&str> {
        None
    }

    fn render_literal(&self, literal: &Literal) -> String {
        match literal {
            Literal::Number(n) => n.clone(),
            Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Boolean(true) => "TRUE".to_string(),
            Literal::Boolean(false) => "FALSE".to_string(),
            Literal::Null => "NULL".to_string(),
        }
    }

    fn render_function(&self, name: &str, args: Vec<String>) -> String {
        format!("{name}({})", args.join(", "))
    }

    fn render_aggregation(&self, agg: &Aggregation, args: &str, distinct: bool) -> String {
        let distinct_kw = if distinct { "DISTINCT " } else { "" };
        format!("{}({distinct_kw}{args})", agg.sql_name())
    }

    /// Trailing pagination clause, `None` when neither part is requested.
    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(limit), None) => Some(format!("LIMIT {limit}")),
            (Some(limit), Some(offset)) => Some(format!("LIMIT {limit} OFFSET {offset}")),
            (None, Some(offset)) => Some(format!("OFFSET {offset}")),
        }
    }

    /// The `sqlparser` dialect used to read view definitions for this engine.
    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect>;
}

mod bigquery;
mod duckdb;
mod mysql;
mod postgres;
mod sqlite;

pub use bigquery::BigQueryDialect;
pub use duckdb::DuckDbDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Options that can switch dialect capabilities off for one data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub native_filter_clause: bool,
    pub cte: bool,
}

impl Capabilities {
    /// Capabilities of `dialect`, narrowed by the configured switches.
    /// Configuration can only disable what the dialect supports.
    pub fn resolve(dialect: &dyn Dialect, native_filter_clause: bool, cte: bool) -> Self {
        Self {
            native_filter_clause: dialect.supports_filtered_aggregates() && native_filter_clause,
            cte: dialect.supports_cte() && cte,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_identifiers_stay_bare() {
        assert_eq!(SqliteDialect.quote_ident("customer_id"), "customer_id");
        assert_eq!(DuckDbDialect.quote_ident("Country"), "Country");
        assert_eq!(PostgresDialect.quote_ident("country"), "country");
    }

    #[test]
    fn quotes_when_needed() {
        assert_eq!(SqliteDialect.quote_ident("order"), "\"order\"");
        assert_eq!(SqliteDialect.quote_ident("unit price"), "\"unit price\"");
        assert_eq!(SqliteDialect.quote_ident("1st"), "\"1st\"");
        assert_eq!(SqliteDialect.quote_ident(""), "\"\"");
        assert_eq!(SqliteDialect.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(PostgresDialect.quote_ident("Country"), "\"Country\"");
        assert_eq!(MySqlDialect.quote_ident("group"), "`group`");
        assert_eq!(BigQueryDialect.quote_ident("a`b"), "`a\\`b`");
    }

    #[test]
    fn capability_switches_only_disable() {
        let caps = Capabilities::resolve(&SqliteDialect, true, false);
        assert!(!caps.native_filter_clause);
        assert!(!caps.cte);
        let caps = Capabilities::resolve(&DuckDbDialect, true, true);
        assert!(caps.native_filter_clause);
        assert!(caps.cte);
    }

    #[test]
    fn offset_only_pagination_is_dialect_specific() {
        assert_eq!(
            SqliteDialect.render_limit_offset(None, Some(5)).as_deref(),
            Some("LIMIT -1 OFFSET 5")
        );
        assert_eq!(
            DuckDbDialect.render_limit_offset(None, Some(5)).as_deref(),
            Some("OFFSET 5")
        );
        assert_eq!(
            MySqlDialect.render_limit_offset(None, Some(5)).as_deref(),
            Some("LIMIT 18446744073709551615 OFFSET 5")
        );
        assert!(PostgresDialect.render_limit_offset(None, None).is_none());
    }
}
