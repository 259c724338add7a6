//! PostgreSQL dialect implementation.

use crate::sql_ast::Aggregation;

use super::Dialect;

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn folds_unquoted_to_lower(&self) -> bool {
        true
    }

    fn supports_filtered_aggregates(&self) -> bool {
        true // PostgreSQL 9.4+ supports FILTER
    }

    fn default_schema(&self) -> Option<&str> {
        Some("public")
    }

    fn render_aggregation(&self, agg: &Aggregation, args: &str, distinct: bool) -> String {
        match agg {
            Aggregation::Median => {
                format!("PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {args})")
            }
            Aggregation::ApproxCountDistinct => format!("COUNT(DISTINCT {args})"), // No native approx in PG
            _ => {
                let distinct_kw = if distinct { "DISTINCT " } else { "" };
                format!("{}({distinct_kw}{args})", agg.sql_name())
            }
        }
    }

    fn parser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        Box::new(sqlparser::dialect::PostgreSqlDialect {})
    }
}
