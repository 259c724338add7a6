use std::collections::BTreeSet;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::models::{Filter, FilterKind};
use crate::sql_ast::SqlExpr;
use crate::sql_parse::parse_expression;

/// Request filters, parsed and split by clause.
#[derive(Default)]
pub(crate) struct RequestFilters {
    pub where_: Vec<SqlExpr>,
    pub having: Vec<SqlExpr>,
}

pub(crate) fn parse_filters(dialect: &dyn Dialect, filters: &[Filter]) -> Result<RequestFilters> {
    let mut parsed = RequestFilters::default();
    for filter in filters {
        let expr = parse_expression(dialect, &filter.expression)?;
        match filter.kind {
            FilterKind::Where => parsed.where_.push(expr),
            FilterKind::Having => parsed.having.push(expr),
        }
    }
    Ok(parsed)
}

/// Table qualifiers used by column references in `expr`.
pub(crate) fn qualifiers(expr: &SqlExpr) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    expr.walk(&mut |node| {
        if let SqlExpr::Column {
            table: Some(table), ..
        } = node
        {
            tables.insert(table.clone());
        }
    });
    tables
}

/// Replace bare references to metric names with `lookup(name)`.
pub(crate) fn substitute_metrics(
    expr: &SqlExpr,
    lookup: &dyn Fn(&str) -> Option<SqlExpr>,
) -> SqlExpr {
    expr.transform(&mut |node| match node {
        SqlExpr::Column { table: None, name } => lookup(name),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::sql_ast::SqlRenderer;

    #[test]
    fn having_references_become_aggregates() {
        let parsed = parse_filters(
            &SqliteDialect,
            &[
                Filter::having("revenue > 100 AND country <> 'DE'"),
                Filter::where_("customers.country = 'FR'"),
            ],
        )
        .unwrap();
        assert_eq!(parsed.where_.len(), 1);
        assert_eq!(
            qualifiers(&parsed.where_[0]),
            BTreeSet::from(["customers".to_string()])
        );

        let revenue = parse_expression(&SqliteDialect, "SUM(amount)").unwrap();
        let substituted = substitute_metrics(&parsed.having[0], &|name| {
            (name == "revenue").then(|| revenue.clone())
        });
        assert_eq!(
            SqlRenderer::new(&SqliteDialect).render_expr(&substituted),
            "SUM(amount) > 100 AND country <> 'DE'"
        );
    }
}
