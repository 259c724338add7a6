use crate::error::{Result, SemaviewError};
use crate::sql_ast::{Cte, Join, SelectItem, SelectQuery, SqlExpr, SqlJoinType, TableRef};

use super::contexts::context_alias;
use super::filters::substitute_metrics;

/// One compiled context: a grouped SELECT and the output columns it exposes.
pub(crate) struct ContextQuery {
    pub select: SelectQuery,
    pub metric_names: Vec<String>,
    pub dimension_outputs: Vec<String>,
}

/// Merge several contexts into one statement.
///
/// Contexts are cross joined, restricted to matching dimension values, as
/// CTEs when the dialect allows them and as derived tables otherwise. Without
/// CTEs, dimensions or HAVING filters, each metric becomes a scalar subquery.
pub(crate) fn combine(
    contexts: Vec<ContextQuery>,
    having: &[SqlExpr],
    use_cte: bool,
) -> Result<SelectQuery> {
    let Some(first) = contexts.first() else {
        return Err(SemaviewError::Validation("no metrics requested".to_string()));
    };
    let dimension_outputs = first.dimension_outputs.clone();
    if let Some(mismatch) = contexts
        .iter()
        .position(|ctx| ctx.dimension_outputs != dimension_outputs)
    {
        return Err(SemaviewError::StructuralMismatch(format!(
            "{} groups by [{}] but {} groups by [{}]",
            context_alias(0),
            dimension_outputs.join(", "),
            context_alias(mismatch),
            contexts[mismatch].dimension_outputs.join(", ")
        )));
    }

    if !use_cte && dimension_outputs.is_empty() && having.is_empty() {
        return Ok(scalar_subqueries(contexts));
    }

    let mut combined = SelectQuery::default();
    for (idx, ctx) in contexts.iter().enumerate() {
        let alias = context_alias(idx);
        for name in &ctx.metric_names {
            combined.select.push(SelectItem {
                expr: SqlExpr::column(Some(&alias), name),
                alias: Some(name.clone()),
            });
        }
        if idx > 0 {
            for output in &dimension_outputs {
                combined.filters.push(SqlExpr::eq(
                    SqlExpr::column(Some(&context_alias(0)), output),
                    SqlExpr::column(Some(&alias), output),
                ));
            }
        }
    }
    for output in &dimension_outputs {
        combined.select.push(SelectItem {
            expr: SqlExpr::column(Some(&context_alias(0)), output),
            alias: None,
        });
    }

    // Every context projects the dimensions; read them from the first.
    let owner = |name: &str| {
        contexts
            .iter()
            .position(|ctx| ctx.metric_names.iter().any(|metric| metric == name))
            .or_else(|| dimension_outputs.iter().any(|output| output == name).then_some(0))
            .map(|idx| SqlExpr::column(Some(&context_alias(idx)), name))
    };
    for filter in having {
        combined.filters.push(substitute_metrics(filter, &owner));
    }

    let mut sources = Vec::with_capacity(contexts.len());
    for (idx, ctx) in contexts.into_iter().enumerate() {
        let alias = context_alias(idx);
        if use_cte {
            combined.with.push(Cte {
                alias: alias.clone(),
                query: ctx.select,
            });
            sources.push(TableRef::named(alias));
        } else {
            sources.push(TableRef::derived(ctx.select, alias));
        }
    }
    let mut sources = sources.into_iter();
    combined.from = sources.next();
    combined.joins = sources
        .map(|table| Join {
            join_type: SqlJoinType::Cross,
            table,
            on: Vec::new(),
        })
        .collect();
    Ok(combined)
}

/// `SELECT (SELECT m1 ...) AS m1, (SELECT m2 ...) AS m2`, one subquery per metric.
fn scalar_subqueries(contexts: Vec<ContextQuery>) -> SelectQuery {
    let mut combined = SelectQuery::default();
    for ctx in contexts {
        for name in &ctx.metric_names {
            let mut single = ctx.select.clone();
            single
                .select
                .retain(|item| item.alias.as_deref() == Some(name.as_str()));
            combined.select.push(SelectItem {
                expr: SqlExpr::Subquery(Box::new(single)),
                alias: Some(name.clone()),
            });
        }
    }
    combined
}
