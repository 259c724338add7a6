//! Value types exchanged between the caller and the compiler.
//!
//! Everything here is immutable once built. Sets are ordered (`BTreeSet`)
//! so that compiling the same request twice renders the same SQL.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;

/// Identity of a table or view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub schema: Option<String>,
    pub catalog: Option<String>,
}

impl Relation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            catalog: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{catalog}.")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        write!(f, "{}", self.name)
    }
}

/// Schema/catalog used for relations that do not spell them out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationDefaults {
    pub schema: Option<String>,
    pub catalog: Option<String>,
}

impl RelationDefaults {
    pub fn new(schema: Option<String>, catalog: Option<String>) -> Self {
        Self { schema, catalog }
    }

    pub fn for_dialect(dialect: &dyn Dialect) -> Self {
        Self {
            schema: dialect.default_schema().map(str::to_string),
            catalog: dialect.default_catalog().map(str::to_string),
        }
    }

    /// Build a relation, filling absent (or empty) parts with the defaults.
    pub fn relation(&self, name: &str, schema: Option<&str>, catalog: Option<&str>) -> Relation {
        let pick = |given: Option<&str>, fallback: &Option<String>| match given {
            Some(part) if !part.is_empty() => Some(part.to_string()),
            _ => fallback.clone(),
        };
        Relation {
            name: name.to_string(),
            schema: pick(schema, &self.schema),
            catalog: pick(catalog, &self.catalog),
        }
    }

    /// Fill the missing parts of an existing relation.
    pub fn qualify(&self, relation: &Relation) -> Relation {
        self.relation(
            &relation.name,
            relation.schema.as_deref(),
            relation.catalog.as_deref(),
        )
    }

    /// Drop the parts that equal the defaults, for shorter rendering.
    pub fn strip(&self, relation: &Relation) -> Relation {
        let keep = |part: &Option<String>, default: &Option<String>| match part {
            Some(p) if Some(p) != default.as_ref() => Some(p.clone()),
            _ => None,
        };
        Relation {
            name: relation.name.clone(),
            schema: keep(&relation.schema, &self.schema),
            catalog: keep(&relation.catalog, &self.catalog),
        }
    }
}

/// A named collection of metrics and dimensions exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemanticView {
    pub name: String,
}

impl SemanticView {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// An aggregated measure backed by a single-aggregate view definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// The defining `SELECT` statement.
    pub sql: String,
    /// The sole projected expression, without its alias.
    pub expression: String,
    /// Relations referenced directly by the defining query.
    pub parents: BTreeSet<Relation>,
    /// Base tables reached after expanding intermediate views.
    pub tables: BTreeSet<Relation>,
}

/// A groupable column on a dimension table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    pub relation: Relation,
    pub column: String,
}

impl Dimension {
    pub fn new(relation: Relation, column: impl Into<String>) -> Self {
        Self {
            relation,
            column: column.into(),
        }
    }

    /// `<quoted-table>.<quoted-column>` for the given dialect.
    pub fn name(&self, dialect: &dyn Dialect) -> String {
        format!(
            "{}.{}",
            dialect.quote_ident(&self.relation.name),
            dialect.quote_ident(&self.column)
        )
    }

    /// Whether `reference` names this dimension, as `column` or `table.column`.
    pub fn matches(&self, reference: &str) -> bool {
        match reference.rsplit_once('.') {
            Some((table, column)) => table == self.relation.name && column == self.column,
            None => reference == self.column,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.relation.name, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Where,
    Having,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Filter {
    pub kind: FilterKind,
    pub expression: String,
}

impl Filter {
    pub fn where_(expression: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Where,
            expression: expression.into(),
        }
    }

    pub fn having(expression: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Having,
            expression: expression.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Ordering over output fields; the direction applies to every field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub fields: Vec<String>,
    pub direction: SortDirection,
}

impl Sort {
    pub fn new<I, S>(fields: I, direction: SortDirection) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            direction,
        }
    }
}

/// Everything the compiler needs to produce one statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub view: SemanticView,
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl QueryRequest {
    pub fn new(view: SemanticView, metrics: Vec<Metric>) -> Self {
        Self {
            view,
            metrics,
            dimensions: Vec::new(),
            filters: Vec::new(),
            sort: None,
            limit: None,
            offset: None,
        }
    }
}

/// The compiler's only output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub sql: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySqlDialect, PostgresDialect, SqliteDialect};

    #[test]
    fn defaults_fill_missing_parts_only() {
        let defaults = RelationDefaults::new(Some("main".to_string()), None);
        assert_eq!(
            defaults.relation("orders", None, None),
            Relation::new("orders").with_schema("main")
        );
        assert_eq!(
            defaults.relation("orders", Some("sales"), Some("")),
            Relation::new("orders").with_schema("sales")
        );
        assert_eq!(
            defaults.strip(&Relation::new("orders").with_schema("main")),
            Relation::new("orders")
        );
    }

    #[test]
    fn dimension_identity_ignores_formatting() {
        let a = Dimension::new(Relation::new("customers"), "country");
        let b = Dimension::new(Relation::new("customers"), "country");
        assert_eq!(a, b);
        assert!(a.matches("country"));
        assert!(a.matches("customers.country"));
        assert!(!a.matches("orders.country"));
        assert_eq!(a.to_string(), "customers.country");
    }

    #[test]
    fn dimension_name_quotes_per_dialect() {
        let plain = Dimension::new(Relation::new("customers").with_schema("main"), "country");
        assert_eq!(plain.name(&SqliteDialect), "customers.country");

        let awkward = Dimension::new(Relation::new("order"), "Unit Price");
        assert_eq!(awkward.name(&SqliteDialect), "\"order\".\"Unit Price\"");
        assert_eq!(awkward.name(&MySqlDialect), "`order`.`Unit Price`");

        let upper = Dimension::new(Relation::new("customers"), "Country");
        assert_eq!(upper.name(&PostgresDialect), "customers.\"Country\"");
    }
}
