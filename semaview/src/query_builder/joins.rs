use std::collections::BTreeSet;

use crate::error::{Result, SemaviewError};
use crate::models::{Relation, RelationDefaults};
use crate::schema::ForeignKey;
use crate::sql_ast::{Join, SqlExpr, SqlJoinType, TableRef};

/// Adds LEFT JOINs from one context's source to the dimension tables it needs.
pub(crate) struct JoinPlanner<'a> {
    foreign_keys: &'a [ForeignKey],
    defaults: &'a RelationDefaults,
    from: &'a TableRef,
    /// Tables whose foreign keys may be followed: the context relation
    /// itself, or the base tables behind it when it is a view.
    sources: BTreeSet<Relation>,
    joined: Vec<Relation>,
}

impl<'a> JoinPlanner<'a> {
    pub fn new(
        foreign_keys: &'a [ForeignKey],
        defaults: &'a RelationDefaults,
        from: &'a TableRef,
        sources: BTreeSet<Relation>,
    ) -> Self {
        Self {
            foreign_keys,
            defaults,
            from,
            sources,
            joined: Vec::new(),
        }
    }

    pub fn from_relation(&self) -> Relation {
        self.defaults.relation(
            &self.from.name,
            self.from.schema.as_deref(),
            self.from.catalog.as_deref(),
        )
    }

    /// Name to qualify a column of `table` with inside this context.
    pub fn qualifier(&self, table: &Relation) -> String {
        if *table == self.from_relation() {
            self.from.reference_name().to_string()
        } else {
            table.name.clone()
        }
    }

    /// Make `table` available to the context, returning the join to add if
    /// it is not already reachable.
    pub fn require(&mut self, table: &Relation) -> Result<Option<Join>> {
        if *table == self.from_relation() || self.joined.contains(table) {
            return Ok(None);
        }

        let mut candidates: Vec<&ForeignKey> = self
            .foreign_keys
            .iter()
            .filter(|fk| self.sources.contains(&fk.table) && fk.referenced_table == *table)
            .collect();
        candidates.sort_by(|a, b| (&a.table, &a.column).cmp(&(&b.table, &b.column)));

        let Some(edge) = candidates.first().copied() else {
            return Err(SemaviewError::IncompatibleSelection(format!(
                "no foreign key leads from {} to {table}",
                self.from_relation()
            )));
        };
        if candidates.len() > 1 {
            tracing::warn!(
                from = %self.from_relation(),
                to = %table,
                chosen = %format!("{}.{}", edge.table, edge.column),
                candidates = candidates.len(),
                "ambiguous join path, using the first foreign key"
            );
        }

        let stripped = self.defaults.strip(table);
        let join = Join {
            join_type: SqlJoinType::Left,
            table: TableRef {
                name: stripped.name,
                schema: stripped.schema,
                catalog: stripped.catalog,
                alias: None,
                subquery: None,
            },
            on: vec![SqlExpr::eq(
                SqlExpr::column(Some(self.from.reference_name()), &edge.column),
                SqlExpr::column(Some(&table.name), &edge.referenced_column),
            )],
        };
        self.joined.push(table.clone());
        Ok(Some(join))
    }
}
