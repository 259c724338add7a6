//! Dimension discovery over the foreign-key graph.
//!
//! Star schema only: a dimension table is one referenced by another table's
//! foreign key, and its dimensions are the columns no foreign key points at.
//! Chains of dimension tables and self references are not followed.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Dimension, Relation, RelationDefaults};
use crate::schema::{ForeignKey, SchemaSnapshot};

pub trait DimensionDiscovery {
    /// Every dimension of the schema.
    fn discover_dimensions(&self) -> BTreeSet<Dimension>;

    /// Fact table -> dimensions reachable through one of its foreign keys.
    fn discover_dimensions_per_relation(&self) -> BTreeMap<Relation, BTreeSet<Dimension>>;
}

pub struct ForeignKeyDiscovery<'s> {
    snapshot: &'s SchemaSnapshot,
    defaults: RelationDefaults,
}

impl<'s> ForeignKeyDiscovery<'s> {
    pub fn new(snapshot: &'s SchemaSnapshot, defaults: RelationDefaults) -> Self {
        Self { snapshot, defaults }
    }

    /// Foreign keys between distinct tables, with both ends qualified.
    fn edges(&self) -> impl Iterator<Item = ForeignKey> + '_ {
        self.snapshot
            .foreign_keys
            .iter()
            .map(|fk| ForeignKey {
                table: self.defaults.qualify(&fk.table),
                column: fk.column.clone(),
                referenced_table: self.defaults.qualify(&fk.referenced_table),
                referenced_column: fk.referenced_column.clone(),
            })
            .filter(|fk| !fk.is_self_reference())
    }

    /// Dimension table -> its columns used as foreign-key targets.
    fn referenced_columns(&self) -> BTreeMap<Relation, BTreeSet<String>> {
        let mut referenced: BTreeMap<Relation, BTreeSet<String>> = BTreeMap::new();
        for fk in self.edges() {
            referenced
                .entry(fk.referenced_table)
                .or_default()
                .insert(fk.referenced_column);
        }
        referenced
    }

    fn columns_of(&self, table: &Relation) -> &[String] {
        self.snapshot
            .tables
            .iter()
            .find(|(relation, _)| self.defaults.qualify(relation) == *table)
            .map(|(_, columns)| columns.as_slice())
            .unwrap_or_default()
    }

    fn descriptive_columns(
        &self,
        table: &Relation,
        referenced: &BTreeMap<Relation, BTreeSet<String>>,
    ) -> BTreeSet<Dimension> {
        let keys = referenced.get(table);
        self.columns_of(table)
            .iter()
            .filter(|column| keys.map_or(true, |keys| !keys.contains(*column)))
            .map(|column| Dimension::new(table.clone(), column.clone()))
            .collect()
    }
}

impl DimensionDiscovery for ForeignKeyDiscovery<'_> {
    fn discover_dimensions(&self) -> BTreeSet<Dimension> {
        let referenced = self.referenced_columns();
        referenced
            .keys()
            .flat_map(|table| self.descriptive_columns(table, &referenced))
            .collect()
    }

    fn discover_dimensions_per_relation(&self) -> BTreeMap<Relation, BTreeSet<Dimension>> {
        let referenced = self.referenced_columns();
        let mut per_relation: BTreeMap<Relation, BTreeSet<Dimension>> = BTreeMap::new();
        for fk in self.edges() {
            let dimensions = self.descriptive_columns(&fk.referenced_table, &referenced);
            per_relation.entry(fk.table).or_default().extend(dimensions);
        }
        per_relation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;

    fn main(name: &str) -> Relation {
        Relation::new(name).with_schema("main")
    }

    fn star() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table(main("orders"), ["id", "customer_id", "amount"])
            .with_table(main("customers"), ["id", "country"])
            .with_table(main("employees"), ["id", "manager_id", "name"])
            .with_foreign_key(ForeignKey::new(
                main("orders"),
                "customer_id",
                main("customers"),
                "id",
            ))
            .with_foreign_key(ForeignKey::new(
                main("employees"),
                "manager_id",
                main("employees"),
                "id",
            ))
    }

    #[test]
    fn referenced_keys_are_not_dimensions() {
        let snapshot = star();
        let discovery =
            ForeignKeyDiscovery::new(&snapshot, RelationDefaults::for_dialect(&SqliteDialect));
        let country = Dimension::new(main("customers"), "country");

        assert_eq!(
            discovery.discover_dimensions(),
            [country.clone()].into_iter().collect()
        );
        let per_relation = discovery.discover_dimensions_per_relation();
        assert_eq!(per_relation.len(), 1);
        assert_eq!(per_relation[&main("orders")], [country].into_iter().collect());
    }

    #[test]
    fn unqualified_foreign_keys_match_qualified_tables() {
        let snapshot = SchemaSnapshot::new()
            .with_table(main("orders"), ["id", "customer_id"])
            .with_table(main("customers"), ["id", "country"])
            .with_foreign_key(ForeignKey::new(
                Relation::new("orders"),
                "customer_id",
                Relation::new("customers"),
                "id",
            ));
        let discovery =
            ForeignKeyDiscovery::new(&snapshot, RelationDefaults::for_dialect(&SqliteDialect));
        assert_eq!(discovery.discover_dimensions().len(), 1);
        assert!(discovery
            .discover_dimensions_per_relation()
            .contains_key(&main("orders")));
    }
}
