//! Pseudo-SQL front end.
//!
//! Callers may phrase a request as SQL against a semantic view:
//!
//! ```sql
//! SELECT revenue, customers.country FROM sales
//! WHERE customers.country <> 'FR' HAVING revenue > 10
//! ORDER BY revenue DESC LIMIT 5
//! ```
//!
//! Projected names are metrics or dimensions (`column` or `table.column`),
//! the single `FROM` names the semantic view. `GROUP BY` may repeat or add
//! dimensions.

use std::collections::BTreeSet;

use crate::dialect::Dialect;
use crate::error::{Result, SemaviewError};
use crate::models::{Dimension, Filter, Metric, QueryRequest, SemanticView, Sort};
use crate::sql_ast::{SqlExpr, SqlRenderer};
use crate::sql_parse::{convert_query, parse_query};

/// Translate pseudo-SQL into a [`QueryRequest`] over the given catalog.
pub fn parse_standard_sql(
    dialect: &dyn Dialect,
    text: &str,
    metrics: &BTreeSet<Metric>,
    dimensions: &BTreeSet<Dimension>,
) -> Result<QueryRequest> {
    let parsed = convert_query(&*parse_query(dialect, text)?)?;
    let renderer = SqlRenderer::new(dialect);

    if !parsed.with.is_empty() || !parsed.joins.is_empty() {
        return Err(invalid("only a single semantic view can be queried"));
    }
    let view = match &parsed.from {
        Some(table) if table.subquery.is_none() => SemanticView::new(table.name.clone()),
        _ => return Err(invalid("FROM must name a semantic view")),
    };

    let resolver = NameResolver {
        metrics,
        dimensions,
    };
    let mut request = QueryRequest::new(view, Vec::new());

    for item in &parsed.select {
        if let Some(alias) = &item.alias {
            return Err(invalid(format!("aliases are not supported (`{alias}`)")));
        }
        match resolver.resolve(&item.expr, &renderer)? {
            Selected::Metric(metric) => {
                if !request.metrics.contains(&metric) {
                    request.metrics.push(metric);
                }
            }
            Selected::Dimension(dimension) => push_dimension(&mut request, dimension),
        }
    }
    for expr in &parsed.group_by {
        match resolver.resolve(expr, &renderer)? {
            Selected::Dimension(dimension) => push_dimension(&mut request, dimension),
            Selected::Metric(metric) => {
                return Err(invalid(format!("cannot group by metric `{}`", metric.name)))
            }
        }
    }

    request
        .filters
        .extend(parsed.filters.iter().map(|f| Filter::where_(renderer.render_expr(f))));
    request
        .filters
        .extend(parsed.having.iter().map(|f| Filter::having(renderer.render_expr(f))));

    if let Some(first) = parsed.order_by.first() {
        if parsed.order_by.iter().any(|o| o.direction != first.direction) {
            return Err(invalid("all ORDER BY terms must share one direction"));
        }
        let fields = parsed
            .order_by
            .iter()
            .map(|item| match &item.expr {
                SqlExpr::Column { table, name } => Ok(match table {
                    Some(table) => format!("{table}.{name}"),
                    None => name.clone(),
                }),
                other => Err(invalid(format!(
                    "ORDER BY accepts names only, got `{}`",
                    renderer.render_expr(other)
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        request.sort = Some(Sort::new(fields, first.direction));
    }

    request.limit = parsed.limit;
    request.offset = parsed.offset;
    Ok(request)
}

fn invalid(message: impl Into<String>) -> SemaviewError {
    SemaviewError::Validation(message.into())
}

fn push_dimension(request: &mut QueryRequest, dimension: Dimension) {
    if !request.dimensions.contains(&dimension) {
        request.dimensions.push(dimension);
    }
}

enum Selected {
    Metric(Metric),
    Dimension(Dimension),
}

struct NameResolver<'a> {
    metrics: &'a BTreeSet<Metric>,
    dimensions: &'a BTreeSet<Dimension>,
}

impl NameResolver<'_> {
    fn resolve(&self, expr: &SqlExpr, renderer: &SqlRenderer<'_>) -> Result<Selected> {
        let reference = match expr {
            SqlExpr::Column { table: None, name } => name.clone(),
            SqlExpr::Column {
                table: Some(table),
                name,
            } => format!("{table}.{name}"),
            other => {
                return Err(invalid(format!(
                    "expected a metric or dimension name, got `{}`",
                    renderer.render_expr(other)
                )))
            }
        };

        if let Some(metric) = self.metrics.iter().find(|m| m.name == reference) {
            return Ok(Selected::Metric(metric.clone()));
        }
        let mut matches = self.dimensions.iter().filter(|d| d.matches(&reference));
        match (matches.next(), matches.next()) {
            (Some(dimension), None) => Ok(Selected::Dimension(dimension.clone())),
            (Some(_), Some(_)) => Err(invalid(format!(
                "`{reference}` is ambiguous; qualify it with its table"
            ))),
            (None, _) => Err(invalid(format!("unknown metric or dimension `{reference}`"))),
        }
    }
}
