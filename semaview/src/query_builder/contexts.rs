use crate::metrics::MetricShape;
use crate::models::Metric;
use crate::sql_ast::{Join, TableRef};

pub(crate) struct MetricPlan<'r> {
    pub metric: &'r Metric,
    pub shape: MetricShape,
}

/// Metrics sharing one `FROM`/`JOIN` shape, computed by a single scan.
pub(crate) struct Context<'r> {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub metrics: Vec<MetricPlan<'r>>,
}

/// Group metrics by structural identity of their source, in first-seen order.
pub(crate) fn group_by_context(plans: Vec<MetricPlan<'_>>) -> Vec<Context<'_>> {
    let mut contexts: Vec<Context<'_>> = Vec::new();
    for plan in plans {
        let existing = contexts
            .iter()
            .position(|ctx| ctx.from == plan.shape.from && ctx.joins == plan.shape.joins);
        match existing {
            Some(idx) => contexts[idx].metrics.push(plan),
            None => contexts.push(Context {
                from: plan.shape.from.clone(),
                joins: plan.shape.joins.clone(),
                metrics: vec![plan],
            }),
        }
    }
    contexts
}

/// Alias of the `idx`-th context in the recombined query.
pub(crate) fn context_alias(idx: usize) -> String {
    format!("context_{idx}")
}
