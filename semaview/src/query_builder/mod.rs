//! The compiler: metrics + dimensions + filters -> one SQL statement.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::CompilerConfig;
use crate::dialect::{Capabilities, Dialect};
use crate::error::{Result, SemaviewError};
use crate::metrics::metric_shape;
use crate::models::{Dimension, Metric, Query, QueryRequest, Relation, RelationDefaults};
use crate::schema::{ForeignKey, SchemaSnapshot};
use crate::sql_ast::{SelectItem, SelectQuery, SqlExpr, SqlRenderer};

mod combine;
mod contexts;
mod filters;
mod joins;
mod measures;
mod order;
mod standard_sql;

use combine::{combine, ContextQuery};
use contexts::{group_by_context, Context, MetricPlan};
use filters::{parse_filters, qualifiers, substitute_metrics};
use joins::JoinPlanner;
use measures::context_measures;

pub use standard_sql::parse_standard_sql;

/// Stateless compiler; holds only options, so one instance can serve
/// concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct SqlBuilder {
    compiler: CompilerConfig,
    defaults: Option<RelationDefaults>,
}

impl SqlBuilder {
    pub fn new(compiler: CompilerConfig) -> Self {
        Self {
            compiler,
            defaults: None,
        }
    }

    /// Override the dialect's default schema/catalog.
    pub fn with_defaults(mut self, defaults: RelationDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    fn defaults_for(&self, dialect: &dyn Dialect) -> RelationDefaults {
        self.defaults
            .clone()
            .unwrap_or_else(|| RelationDefaults::for_dialect(dialect))
    }

    /// Compile `request` against `schema` for `dialect`.
    pub fn build_with_dialect(
        &self,
        schema: &SchemaSnapshot,
        request: &QueryRequest,
        dialect: &dyn Dialect,
    ) -> Result<Query> {
        let select = self.build_select(schema, request, dialect)?;
        let sql = SqlRenderer::new(dialect).render_select(&select);
        tracing::trace!(sql = %sql, "rendered query");
        Ok(Query { sql })
    }

    fn build_select(
        &self,
        schema: &SchemaSnapshot,
        request: &QueryRequest,
        dialect: &dyn Dialect,
    ) -> Result<SelectQuery> {
        let capabilities = Capabilities::resolve(
            dialect,
            self.compiler.native_filter_clause,
            self.compiler.cte,
        );
        let defaults = self.defaults_for(dialect);
        let renderer = SqlRenderer::new(dialect);

        let metrics = unique_metrics(&request.metrics);
        if metrics.is_empty() {
            return Err(SemaviewError::Validation(
                "at least one metric is required".to_string(),
            ));
        }
        let dimensions = dimension_outputs(&request.dimensions, &defaults);
        let filters = parse_filters(dialect, &request.filters)?;

        let mut plans = Vec::with_capacity(metrics.len());
        for metric in &metrics {
            plans.push(MetricPlan {
                metric,
                shape: metric_shape(dialect, metric)?,
            });
        }
        let contexts = group_by_context(plans);

        let foreign_keys = qualified_foreign_keys(schema, &defaults);
        let views: BTreeSet<Relation> = schema.views.keys().map(|v| defaults.qualify(v)).collect();
        let tables_by_name = tables_by_name(schema, &defaults);

        let single = contexts.len() == 1;
        let mut compiled = Vec::with_capacity(contexts.len());
        for ctx in &contexts {
            let sources = context_sources(ctx, &views, &defaults);
            let mut planner = JoinPlanner::new(&foreign_keys, &defaults, &ctx.from, sources);

            let mut joins = ctx.joins.clone();
            for (dimension, _) in &dimensions {
                joins.extend(planner.require(&dimension.relation)?);
            }
            for filter in &filters.where_ {
                for qualifier in qualifiers(filter) {
                    if qualifier == ctx.from.reference_name() {
                        continue;
                    }
                    if let Some(table) = tables_by_name.get(&qualifier) {
                        joins.extend(planner.require(table)?);
                    }
                }
            }

            let mut measures = context_measures(ctx, capabilities.native_filter_clause, &renderer)?;
            if joins.len() > ctx.joins.len() {
                measures = measures.qualified(ctx.from.reference_name());
            }

            let mut select = SelectQuery {
                from: Some(ctx.from.clone()),
                joins,
                ..Default::default()
            };
            select.filters.extend(measures.shared_predicate.clone());
            for (name, expr) in &measures.projections {
                select.select.push(SelectItem {
                    expr: expr.clone(),
                    alias: Some(name.clone()),
                });
            }
            for (dimension, output) in &dimensions {
                let column = SqlExpr::column(Some(&planner.qualifier(&dimension.relation)), &dimension.column);
                select.select.push(SelectItem {
                    expr: column.clone(),
                    alias: (*output != dimension.column).then(|| output.clone()),
                });
                select.group_by.push(column);
            }
            select.filters.extend(filters.where_.iter().cloned());

            if single {
                let lookup = |name: &str| {
                    measures
                        .projections
                        .iter()
                        .find(|(metric, _)| metric == name)
                        .map(|(_, expr)| expr.clone())
                };
                for filter in &filters.having {
                    select.having.push(substitute_metrics(filter, &lookup));
                }
            }

            compiled.push(ContextQuery {
                select,
                metric_names: measures.projections.into_iter().map(|(name, _)| name).collect(),
                dimension_outputs: dimensions.iter().map(|(_, output)| output.clone()).collect(),
            });
        }

        let mut query = if single {
            compiled.remove(0).select
        } else {
            combine(compiled, &filters.having, capabilities.cte)?
        };

        if let Some(sort) = &request.sort {
            let names: Vec<String> = metrics.iter().map(|m| m.name.clone()).collect();
            query.order_by = order::order_items(sort, &names, &dimensions)?;
        }
        query.offset = request.offset;
        query.limit = request.limit;

        tracing::debug!(
            contexts = contexts.len(),
            metrics = metrics.len(),
            dimensions = dimensions.len(),
            cte = capabilities.cte,
            native_filter_clause = capabilities.native_filter_clause,
            "compiled query"
        );
        Ok(query)
    }
}

/// Drop repeated metrics (by name), keeping the first occurrence.
fn unique_metrics(metrics: &[Metric]) -> Vec<Metric> {
    let mut seen = BTreeSet::new();
    metrics
        .iter()
        .filter(|m| seen.insert(m.name.clone()))
        .cloned()
        .collect()
}

/// Pair each requested dimension with its output column name: the column,
/// or `<table>_<column>` when another requested dimension shares the column.
fn dimension_outputs(
    dimensions: &[Dimension],
    defaults: &RelationDefaults,
) -> Vec<(Dimension, String)> {
    let mut unique: Vec<Dimension> = Vec::new();
    for dimension in dimensions {
        let dimension = Dimension::new(defaults.qualify(&dimension.relation), &dimension.column);
        if !unique.contains(&dimension) {
            unique.push(dimension);
        }
    }
    let mut column_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for dimension in &unique {
        *column_counts.entry(dimension.column.as_str()).or_default() += 1;
    }
    let outputs: Vec<String> = unique
        .iter()
        .map(|d| {
            if column_counts[d.column.as_str()] > 1 {
                format!("{}_{}", d.relation.name, d.column)
            } else {
                d.column.clone()
            }
        })
        .collect();
    unique.into_iter().zip(outputs).collect()
}

fn qualified_foreign_keys(schema: &SchemaSnapshot, defaults: &RelationDefaults) -> Vec<ForeignKey> {
    schema
        .foreign_keys
        .iter()
        .map(|fk| ForeignKey {
            table: defaults.qualify(&fk.table),
            column: fk.column.clone(),
            referenced_table: defaults.qualify(&fk.referenced_table),
            referenced_column: fk.referenced_column.clone(),
        })
        .filter(|fk| !fk.is_self_reference())
        .collect()
}

/// Table name -> relation, for tables whose name is unique in the snapshot.
fn tables_by_name(schema: &SchemaSnapshot, defaults: &RelationDefaults) -> BTreeMap<String, Relation> {
    let mut by_name: BTreeMap<String, Option<Relation>> = BTreeMap::new();
    for table in schema.tables.keys() {
        by_name
            .entry(table.name.clone())
            .and_modify(|slot| *slot = None)
            .or_insert_with(|| Some(defaults.qualify(table)));
    }
    by_name
        .into_iter()
        .filter_map(|(name, relation)| relation.map(|r| (name, r)))
        .collect()
}

/// Tables whose foreign keys a context may follow.
fn context_sources(
    ctx: &Context<'_>,
    views: &BTreeSet<Relation>,
    defaults: &RelationDefaults,
) -> BTreeSet<Relation> {
    let from = defaults.relation(
        &ctx.from.name,
        ctx.from.schema.as_deref(),
        ctx.from.catalog.as_deref(),
    );
    if views.contains(&from) {
        ctx.metrics
            .iter()
            .flat_map(|plan| plan.metric.tables.iter().cloned())
            .collect()
    } else {
        BTreeSet::from([from])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_column_names_are_prefixed_with_their_table() {
        let defaults = RelationDefaults::new(Some("main".into()), None);
        let dims = [
            Dimension::new(Relation::new("customers"), "name"),
            Dimension::new(Relation::new("products"), "name"),
            Dimension::new(Relation::new("customers"), "country"),
            Dimension::new(Relation::new("customers").with_schema("main"), "country"),
        ];
        let outputs: Vec<String> = dimension_outputs(&dims, &defaults)
            .into_iter()
            .map(|(_, output)| output)
            .collect();
        assert_eq!(outputs, vec!["customers_name", "products_name", "country"]);
    }
}
