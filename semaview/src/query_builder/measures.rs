use crate::error::{Result, SemaviewError};
use crate::sql_ast::{Aggregation, Literal, SqlBinaryOperator, SqlExpr, SqlRenderer};

use super::contexts::Context;

/// Projection of each metric in a context, plus the WHERE shared by all of them.
pub(crate) struct ContextMeasures {
    pub projections: Vec<(String, SqlExpr)>,
    pub shared_predicate: Option<SqlExpr>,
}

impl ContextMeasures {
    /// Prefix bare column references with `table`.
    pub fn qualified(self, table: &str) -> Self {
        let mut qualify = |node: &SqlExpr| match node {
            SqlExpr::Column { table: None, name } => Some(SqlExpr::column(Some(table), name)),
            _ => None,
        };
        Self {
            projections: self
                .projections
                .into_iter()
                .map(|(name, expr)| (name, expr.transform(&mut qualify)))
                .collect(),
            shared_predicate: self.shared_predicate.map(|p| p.transform(&mut qualify)),
        }
    }
}

/// When every metric of the context carries the same predicate (or none),
/// it becomes the context's WHERE. Otherwise each filtered metric is turned
/// into a conditional aggregate so the context still needs a single scan.
pub(crate) fn context_measures(
    ctx: &Context<'_>,
    native_filter_clause: bool,
    renderer: &SqlRenderer<'_>,
) -> Result<ContextMeasures> {
    let mut predicates: Vec<Option<&SqlExpr>> = Vec::new();
    for plan in &ctx.metrics {
        let predicate = plan.shape.predicate.as_ref();
        if !predicates.contains(&predicate) {
            predicates.push(predicate);
        }
    }

    if predicates.len() <= 1 {
        return Ok(ContextMeasures {
            projections: ctx
                .metrics
                .iter()
                .map(|plan| (plan.metric.name.clone(), plan.shape.expression.clone()))
                .collect(),
            shared_predicate: predicates.first().copied().flatten().cloned(),
        });
    }

    let mut projections = Vec::with_capacity(ctx.metrics.len());
    for plan in &ctx.metrics {
        let expr = match &plan.shape.predicate {
            Some(predicate) => conditional_aggregate(
                &plan.shape.expression,
                predicate,
                native_filter_clause,
                renderer,
            )?,
            None => plan.shape.expression.clone(),
        };
        projections.push((plan.metric.name.clone(), expr));
    }
    Ok(ContextMeasures {
        projections,
        shared_predicate: None,
    })
}

/// Push `predicate` into every aggregate call of `expr`.
pub(crate) fn conditional_aggregate(
    expr: &SqlExpr,
    predicate: &SqlExpr,
    native_filter_clause: bool,
    renderer: &SqlRenderer<'_>,
) -> Result<SqlExpr> {
    let mut failure = None;
    let rewritten = expr.transform(&mut |node| match node {
        SqlExpr::Aggregate { .. } => {
            match filter_aggregate(node, predicate, native_filter_clause) {
                Some(filtered) => Some(filtered),
                None => {
                    failure.get_or_insert_with(|| {
                        SemaviewError::UnsupportedRewrite(format!(
                            "cannot apply a filter to `{}` on {}",
                            renderer.render_expr(node),
                            if native_filter_clause {
                                "this dialect"
                            } else {
                                "a dialect without FILTER (WHERE ...)"
                            }
                        ))
                    });
                    Some(node.clone())
                }
            }
        }
        _ => None,
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(rewritten),
    }
}

fn case_when(predicate: &SqlExpr, then: SqlExpr, otherwise: SqlExpr) -> SqlExpr {
    SqlExpr::Case {
        operand: None,
        branches: vec![(predicate.clone(), then)],
        else_expr: Some(Box::new(otherwise)),
    }
}

fn and(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    SqlExpr::BinaryOp {
        op: SqlBinaryOperator::And,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn filter_aggregate(node: &SqlExpr, predicate: &SqlExpr, native: bool) -> Option<SqlExpr> {
    let SqlExpr::Aggregate {
        agg,
        args,
        distinct,
        filter,
    } = node
    else {
        return None;
    };

    if native {
        let combined = match filter {
            Some(existing) => and(existing.as_ref().clone(), predicate.clone()),
            None => predicate.clone(),
        };
        return Some(SqlExpr::Aggregate {
            agg: *agg,
            args: args.clone(),
            distinct: *distinct,
            filter: Some(Box::new(combined)),
        });
    }
    if filter.is_some() {
        return None;
    }

    let aggregate = |agg: Aggregation, arg: SqlExpr, distinct: bool| SqlExpr::Aggregate {
        agg,
        args: vec![arg],
        distinct,
        filter: None,
    };
    let [arg] = args.as_slice() else {
        return None;
    };

    let (agg, distinct) = (*agg, *distinct);
    let rewritten = match (agg, distinct) {
        (Aggregation::Count, false) => {
            let condition = match arg {
                SqlExpr::Wildcard | SqlExpr::Literal(_) => predicate.clone(),
                column => and(
                    predicate.clone(),
                    SqlExpr::IsNull {
                        expr: Box::new(column.clone()),
                        negated: true,
                    },
                ),
            };
            aggregate(
                Aggregation::Sum,
                case_when(&condition, SqlExpr::number(1), SqlExpr::number(0)),
                false,
            )
        }
        (Aggregation::Sum | Aggregation::Total, false) => aggregate(
            agg,
            case_when(predicate, arg.clone(), SqlExpr::number(0)),
            false,
        ),
        (
            Aggregation::Count
            | Aggregation::Sum
            | Aggregation::Total
            | Aggregation::Max
            | Aggregation::Min
            | Aggregation::Avg,
            _,
        ) => {
            if *arg == SqlExpr::Wildcard {
                return None;
            }
            aggregate(
                agg,
                case_when(predicate, arg.clone(), SqlExpr::Literal(Literal::Null)),
                distinct,
            )
        }
        _ => return None,
    };
    Some(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::sql_parse::parse_expression;

    fn rewrite(expr: &str, predicate: &str, native: bool) -> Result<String> {
        let renderer = SqlRenderer::new(&SqliteDialect);
        let expr = parse_expression(&SqliteDialect, expr)?;
        let predicate = parse_expression(&SqliteDialect, predicate)?;
        let rewritten = conditional_aggregate(&expr, &predicate, native, &renderer)?;
        Ok(renderer.render_expr(&rewritten))
    }

    #[test]
    fn case_rewrites_per_function() {
        assert_eq!(
            rewrite("SUM(amount)", "status = 'paid'", false).unwrap(),
            "SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END)"
        );
        assert_eq!(
            rewrite("COUNT(*)", "status = 'refunded'", false).unwrap(),
            "SUM(CASE WHEN status = 'refunded' THEN 1 ELSE 0 END)"
        );
        assert_eq!(
            rewrite("COUNT(customer_id)", "a = 1 OR b = 2", false).unwrap(),
            "SUM(CASE WHEN (a = 1 OR b = 2) AND customer_id IS NOT NULL THEN 1 ELSE 0 END)"
        );
        assert_eq!(
            rewrite("MAX(amount)", "paid", false).unwrap(),
            "MAX(CASE WHEN paid THEN amount ELSE NULL END)"
        );
        assert_eq!(
            rewrite("COUNT(DISTINCT customer_id)", "paid", false).unwrap(),
            "COUNT(DISTINCT CASE WHEN paid THEN customer_id ELSE NULL END)"
        );
    }

    #[test]
    fn native_filter_clause_wraps_every_aggregate() {
        assert_eq!(
            rewrite("SUM(amount) / COUNT(*)", "paid", true).unwrap(),
            "SUM(amount) FILTER (WHERE paid) / COUNT(*) FILTER (WHERE paid)"
        );
    }

    #[test]
    fn unknown_functions_are_not_silently_unfiltered() {
        let err = rewrite("GROUP_CONCAT(name)", "paid", false).unwrap_err();
        match err {
            SemaviewError::UnsupportedRewrite(msg) => assert!(msg.contains("GROUP_CONCAT(name)")),
            other => panic!("unexpected error {other}"),
        }
    }
}
