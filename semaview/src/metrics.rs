//! Recognising metric views: a single aggregate projection over one relation.

use std::collections::BTreeSet;

use sqlparser::ast as sql;

use crate::dialect::Dialect;
use crate::error::{Result, SemaviewError};
use crate::models::Metric;
use crate::relations::ViewCatalog;
use crate::sql_ast::{Join, SqlExpr, SqlRenderer, TableRef};
use crate::sql_parse::{convert_query, parse_query};

/// The parts of a metric definition the compiler works with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricShape {
    pub expression: SqlExpr,
    pub alias: Option<String>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub predicate: Option<SqlExpr>,
}

fn violation(reason: &str) -> SemaviewError {
    SemaviewError::ShapeViolation(reason.to_string())
}

/// Check that `query` is a single-aggregate, single-relation `SELECT`.
pub fn check_shape(query: &sql::Query) -> Result<MetricShape> {
    if query.with.is_some() {
        return Err(violation("WITH clauses are not allowed"));
    }
    if !matches!(query.body.as_ref(), sql::SetExpr::Select(_)) {
        return Err(violation("expected a plain SELECT"));
    }
    let mut select = convert_query(query)?;

    if select.select.len() != 1 {
        return Err(violation("expected exactly one projection"));
    }
    let item = select.select.remove(0);
    if item.expr == SqlExpr::Wildcard {
        return Err(violation("wildcard projection"));
    }
    if !item.expr.contains_aggregate() {
        return Err(violation("projection has no aggregate function"));
    }
    let from = match select.from {
        Some(from) if from.subquery.is_none() => from,
        Some(_) => return Err(violation("FROM must name a table or view")),
        None => return Err(violation("missing FROM clause")),
    };
    if !select.joins.is_empty() {
        return Err(violation("joins are not allowed"));
    }
    if !select.group_by.is_empty() || !select.having.is_empty() {
        return Err(violation("GROUP BY and HAVING are not allowed"));
    }
    if select.limit.is_some() || select.offset.is_some() || !select.order_by.is_empty() {
        return Err(violation("ORDER BY, LIMIT and OFFSET are not allowed"));
    }

    Ok(MetricShape {
        expression: item.expr,
        alias: item.alias,
        from,
        joins: select.joins,
        predicate: SqlExpr::conjunction(select.filters),
    })
}

/// Re-read a metric's definition when compiling; any mismatch is fatal.
pub fn metric_shape(dialect: &dyn Dialect, metric: &Metric) -> Result<MetricShape> {
    parse_query(dialect, &metric.sql)
        .and_then(|query| check_shape(&query))
        .map_err(|err| {
            let reason = match err {
                SemaviewError::ShapeViolation(reason) => reason,
                other => other.to_string(),
            };
            SemaviewError::ShapeViolation(format!("metric `{}`: {reason}", metric.name))
        })
}

pub struct MetricExtractor<'c, 'd> {
    catalog: &'c ViewCatalog<'d>,
}

impl<'c, 'd> MetricExtractor<'c, 'd> {
    pub fn new(catalog: &'c ViewCatalog<'d>) -> Self {
        Self { catalog }
    }

    /// Build a metric from a view definition, or `None` when it is not metric-shaped.
    pub fn extract(&self, name: &str, query: &sql::Query) -> Result<Option<Metric>> {
        let shape = match check_shape(query) {
            Ok(shape) => shape,
            Err(SemaviewError::ShapeViolation(reason)) => {
                tracing::trace!(view = name, reason = %reason, "not a metric");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let metric_name = match (&shape.alias, &shape.expression) {
            (Some(alias), _) => alias.clone(),
            (None, SqlExpr::Column { name, .. }) => name.clone(),
            _ => name.to_string(),
        };
        let expression = SqlRenderer::new(self.catalog.dialect()).render_expr(&shape.expression);

        Ok(Some(Metric {
            name: metric_name,
            sql: query.to_string(),
            expression,
            parents: self.catalog.direct_relations(query),
            tables: self.catalog.resolve_query(query, true)?,
        }))
    }

    /// Every metric among the catalog's views. Views that fail to parse are
    /// logged and skipped.
    pub fn metrics(&self) -> Result<BTreeSet<Metric>> {
        let mut metrics = BTreeSet::new();
        for (relation, definition) in self.catalog.views() {
            let query = match parse_query(self.catalog.dialect(), definition) {
                Ok(query) => query,
                Err(err) => {
                    tracing::warn!(view = %relation, error = %err, "skipping unparseable view");
                    continue;
                }
            };
            if let Some(metric) = self.extract(&relation.name, &query)? {
                metrics.insert(metric);
            }
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::models::{Relation, RelationDefaults};
    use crate::schema::SchemaSnapshot;

    fn main(name: &str) -> Relation {
        Relation::new(name).with_schema("main")
    }

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table(main("orders"), ["id", "customer_id", "amount", "status"])
            .with_table(main("customers"), ["id", "country"])
            .with_view(
                main("paid_orders"),
                "CREATE VIEW paid_orders AS SELECT * FROM orders WHERE status = 'paid'",
            )
            .with_view(
                main("paid_revenue"),
                "CREATE VIEW paid_revenue AS SELECT SUM(amount) AS revenue FROM paid_orders",
            )
    }

    fn extract(sql: &str) -> Option<Metric> {
        let snapshot = snapshot();
        let catalog = ViewCatalog::new(
            &SqliteDialect,
            RelationDefaults::for_dialect(&SqliteDialect),
            &snapshot,
        )
        .unwrap();
        let query = parse_query(&SqliteDialect, sql).unwrap();
        MetricExtractor::new(&catalog).extract("view", &query).unwrap()
    }

    #[test]
    fn extracts_aggregate_view_through_nested_views() {
        let metric = extract("SELECT SUM(amount) AS revenue FROM paid_orders").unwrap();
        assert_eq!(metric.name, "revenue");
        assert_eq!(metric.expression, "SUM(amount)");
        assert_eq!(metric.parents, [main("paid_orders")].into_iter().collect());
        assert_eq!(metric.tables, [main("orders")].into_iter().collect());
    }

    #[test]
    fn unaliased_aggregate_takes_the_view_name() {
        let metric = extract("SELECT COUNT(*) FROM orders").unwrap();
        assert_eq!(metric.name, "view");
    }

    #[test]
    fn rejects_non_metric_shapes() {
        assert!(extract("SELECT SUM(amount), COUNT(*) FROM orders").is_none());
        assert!(extract("SELECT amount FROM orders").is_none());
        assert!(extract(
            "SELECT SUM(o.amount) FROM orders o JOIN customers c ON o.customer_id = c.id"
        )
        .is_none());
        assert!(extract("SELECT SUM(amount) FROM orders, customers").is_none());
        assert!(extract("SELECT status, SUM(amount) FROM orders GROUP BY status").is_none());
        assert!(extract("SELECT * FROM orders").is_none());
    }

    #[test]
    fn scanning_the_catalog_keeps_only_metrics() {
        let snapshot = snapshot();
        let catalog = ViewCatalog::new(
            &SqliteDialect,
            RelationDefaults::for_dialect(&SqliteDialect),
            &snapshot,
        )
        .unwrap();
        let metrics = MetricExtractor::new(&catalog).metrics().unwrap();
        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["revenue"]);
    }
}
