//! One introspection pass over a database catalog.
//!
//! A snapshot is rebuilt for every facade call; nothing is cached between
//! calls, so two compiles racing a DDL change may see different catalogs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{Relation, SemanticView};

/// Semantic view name used for relations that carry no schema.
pub const DEFAULT_VIEW_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: Relation,
    pub column: String,
    pub referenced_table: Relation,
    pub referenced_column: String,
}

impl ForeignKey {
    pub fn new(
        table: Relation,
        column: impl Into<String>,
        referenced_table: Relation,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            table,
            column: column.into(),
            referenced_table,
            referenced_column: referenced_column.into(),
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.table == self.referenced_table
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// View relation -> defining SQL text.
    pub views: BTreeMap<Relation, String>,
    /// Base table -> column names in ordinal order.
    pub tables: BTreeMap<Relation, Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<I, S>(mut self, relation: Relation, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .entry(relation)
            .or_default()
            .extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn with_view(mut self, relation: Relation, sql: impl Into<String>) -> Self {
        self.views.insert(relation, sql.into());
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Every schema holding at least one table or view, as a semantic view.
    pub fn semantic_views(&self) -> BTreeSet<SemanticView> {
        self.tables
            .keys()
            .chain(self.views.keys())
            .map(|relation| SemanticView::new(view_name_of(relation)))
            .collect()
    }

    pub fn has_semantic_view(&self, view: &SemanticView) -> bool {
        self.tables
            .keys()
            .chain(self.views.keys())
            .any(|relation| view_name_of(relation) == view.name)
    }

    /// Restrict the snapshot to the relations of one semantic view.
    /// Foreign keys are kept when their referencing table is in scope.
    pub fn scoped(&self, view: &SemanticView) -> SchemaSnapshot {
        let in_scope = |relation: &Relation| view_name_of(relation) == view.name;
        SchemaSnapshot {
            views: self
                .views
                .iter()
                .filter(|(relation, _)| in_scope(relation))
                .map(|(relation, sql)| (relation.clone(), sql.clone()))
                .collect(),
            tables: self
                .tables
                .iter()
                .filter(|(relation, _)| in_scope(relation))
                .map(|(relation, columns)| (relation.clone(), columns.clone()))
                .collect(),
            foreign_keys: self
                .foreign_keys
                .iter()
                .filter(|fk| in_scope(&fk.table))
                .cloned()
                .collect(),
        }
    }

    pub fn columns(&self, relation: &Relation) -> Option<&[String]> {
        self.tables.get(relation).map(Vec::as_slice)
    }
}

fn view_name_of(relation: &Relation) -> &str {
    relation.schema.as_deref().unwrap_or(DEFAULT_VIEW_NAME)
}
