//! Table references of a query, and their expansion through view definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use sqlparser::ast::{self as sql, Visit, Visitor};

use crate::dialect::Dialect;
use crate::error::{Result, SemaviewError};
use crate::models::{Relation, RelationDefaults};
use crate::schema::SchemaSnapshot;
use crate::sql_parse::{object_name_parts, parse_query};

/// Collects table sources and CTE aliases over every scope of a statement.
#[derive(Default)]
struct RelationCollector {
    relations: Vec<sql::ObjectName>,
    cte_aliases: BTreeSet<String>,
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &sql::Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_aliases.insert(cte.alias.name.value.clone());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &sql::ObjectName) -> ControlFlow<Self::Break> {
        self.relations.push(relation.clone());
        ControlFlow::Continue(())
    }
}

/// Relations referenced as table sources anywhere in `query`, qualified with
/// `defaults`. Names bound by a `WITH` clause of the statement are skipped.
pub fn direct_relations(query: &sql::Query, defaults: &RelationDefaults) -> BTreeSet<Relation> {
    let mut collector = RelationCollector::default();
    let _ = query.visit(&mut collector);

    collector
        .relations
        .iter()
        .filter(|name| !(name.0.len() == 1 && collector.cte_aliases.contains(&name.0[0].value)))
        .map(|name| {
            let (table, schema, catalog) = object_name_parts(name);
            defaults.relation(&table, schema.as_deref(), catalog.as_deref())
        })
        .collect()
}

/// Known views of a catalog, used to expand view references into base tables.
pub struct ViewCatalog<'d> {
    dialect: &'d dyn Dialect,
    defaults: RelationDefaults,
    views: BTreeMap<Relation, String>,
}

impl<'d> ViewCatalog<'d> {
    /// Build the catalog from a snapshot. A name that is both a table and a
    /// view is a configuration error.
    pub fn new(
        dialect: &'d dyn Dialect,
        defaults: RelationDefaults,
        snapshot: &SchemaSnapshot,
    ) -> Result<Self> {
        let views: BTreeMap<Relation, String> = snapshot
            .views
            .iter()
            .map(|(relation, sql)| (defaults.qualify(relation), sql.clone()))
            .collect();

        let collisions: Vec<String> = snapshot
            .tables
            .keys()
            .map(|table| defaults.qualify(table))
            .filter(|table| views.contains_key(table))
            .map(|table| table.to_string())
            .collect();
        if !collisions.is_empty() {
            return Err(SemaviewError::Config(format!(
                "relations defined as both table and view: {}",
                collisions.join(", ")
            )));
        }

        Ok(Self {
            dialect,
            defaults,
            views,
        })
    }

    pub fn defaults(&self) -> &RelationDefaults {
        &self.defaults
    }

    pub fn dialect(&self) -> &'d dyn Dialect {
        self.dialect
    }

    pub fn views(&self) -> impl Iterator<Item = (&Relation, &String)> {
        self.views.iter()
    }

    pub fn direct_relations(&self, query: &sql::Query) -> BTreeSet<Relation> {
        direct_relations(query, &self.defaults)
    }

    /// Relations of `text`, with view references replaced by the relations of
    /// their definitions: one level deep, or down to base tables with `recurse`.
    pub fn resolve(&self, text: &str, recurse: bool) -> Result<BTreeSet<Relation>> {
        let query = parse_query(self.dialect, text)?;
        self.resolve_query(&query, recurse)
    }

    pub fn resolve_query(&self, query: &sql::Query, recurse: bool) -> Result<BTreeSet<Relation>> {
        let mut stack = Vec::new();
        self.expand(self.direct_relations(query), recurse, &mut stack)
    }

    fn expand(
        &self,
        relations: BTreeSet<Relation>,
        recurse: bool,
        stack: &mut Vec<Relation>,
    ) -> Result<BTreeSet<Relation>> {
        let mut resolved = BTreeSet::new();
        for relation in relations {
            let Some(definition) = self.views.get(&relation) else {
                resolved.insert(relation);
                continue;
            };
            if stack.contains(&relation) {
                let mut cycle: Vec<String> = stack.iter().map(ToString::to_string).collect();
                cycle.push(relation.to_string());
                return Err(SemaviewError::Config(format!(
                    "view definitions form a cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            let inner = self.direct_relations(&*parse_query(self.dialect, definition)?);
            if recurse {
                stack.push(relation);
                resolved.extend(self.expand(inner, true, stack)?);
                stack.pop();
            } else {
                resolved.extend(inner);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;

    fn main(name: &str) -> Relation {
        Relation::new(name).with_schema("main")
    }

    fn defaults() -> RelationDefaults {
        RelationDefaults::for_dialect(&SqliteDialect)
    }

    #[test]
    fn finds_relations_in_nested_scopes_but_not_cte_names() {
        let query = parse_query(
            &SqliteDialect,
            "WITH recent AS (SELECT * FROM orders WHERE id > (SELECT MAX(id) - 10 FROM archive.orders)) \
             SELECT COUNT(*) FROM recent JOIN (SELECT id FROM customers) c ON c.id = recent.customer_id",
        )
        .unwrap();
        let relations = direct_relations(&query, &defaults());
        let expected: BTreeSet<Relation> = [
            main("orders"),
            Relation::new("orders").with_schema("archive"),
            main("customers"),
        ]
        .into_iter()
        .collect();
        assert_eq!(relations, expected);
    }

    #[test]
    fn resolves_nested_views_to_base_tables() {
        let snapshot = SchemaSnapshot::new()
            .with_table(main("orders"), ["id", "amount"])
            .with_view(main("paid_orders"), "SELECT * FROM orders WHERE status = 'paid'")
            .with_view(main("big_paid_orders"), "SELECT * FROM paid_orders WHERE amount > 100");
        let catalog = ViewCatalog::new(&SqliteDialect, defaults(), &snapshot).unwrap();

        let sql = "SELECT SUM(amount) FROM big_paid_orders";
        let one_level = catalog.resolve(sql, false).unwrap();
        assert_eq!(one_level, [main("paid_orders")].into_iter().collect());
        let closure = catalog.resolve(sql, true).unwrap();
        assert_eq!(closure, [main("orders")].into_iter().collect());
    }

    #[test]
    fn view_cycles_are_config_errors() {
        let snapshot = SchemaSnapshot::new()
            .with_view(main("a"), "SELECT * FROM b")
            .with_view(main("b"), "SELECT * FROM a");
        let catalog = ViewCatalog::new(&SqliteDialect, defaults(), &snapshot).unwrap();
        let err = catalog.resolve("SELECT COUNT(*) FROM a", true).unwrap_err();
        assert!(matches!(err, SemaviewError::Config(msg) if msg.contains("cycle")));
    }

    #[test]
    fn table_and_view_with_same_name_is_rejected() {
        let snapshot = SchemaSnapshot::new()
            .with_table(main("orders"), ["id"])
            .with_view(Relation::new("orders"), "SELECT 1");
        let err = ViewCatalog::new(&SqliteDialect, defaults(), &snapshot)
            .err()
            .unwrap();
        assert!(matches!(err, SemaviewError::Config(_)));
    }
}
