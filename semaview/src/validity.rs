use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SemaviewError};
use crate::models::{Dimension, Metric, Relation};

/// Cross-checks a metric/dimension selection.
///
/// A metric and a dimension are compatible when the dimension is reachable
/// from every base table the metric reads.
pub struct ValidityResolver {
    metrics: BTreeSet<Metric>,
    dimensions: BTreeSet<Dimension>,
    dimensions_per_relation: BTreeMap<Relation, BTreeSet<Dimension>>,
}

impl ValidityResolver {
    pub fn new(
        metrics: BTreeSet<Metric>,
        dimensions: BTreeSet<Dimension>,
        dimensions_per_relation: BTreeMap<Relation, BTreeSet<Dimension>>,
    ) -> Self {
        Self {
            metrics,
            dimensions,
            dimensions_per_relation,
        }
    }

    pub fn is_compatible(&self, metric: &Metric, dimension: &Dimension) -> bool {
        metric.tables.iter().all(|table| {
            self.dimensions_per_relation
                .get(table)
                .is_some_and(|reachable| reachable.contains(dimension))
        })
    }

    /// Catalog metrics usable with `dimensions`. Fails when any of
    /// `requested` is not among them.
    pub fn valid_metrics(
        &self,
        requested: &[Metric],
        dimensions: &[Dimension],
    ) -> Result<BTreeSet<Metric>> {
        let valid: BTreeSet<Metric> = self
            .metrics
            .iter()
            .filter(|metric| dimensions.iter().all(|d| self.is_compatible(metric, d)))
            .cloned()
            .collect();

        let valid_names: BTreeSet<&str> = valid.iter().map(|m| m.name.as_str()).collect();
        let invalid: BTreeSet<&str> = requested
            .iter()
            .map(|m| m.name.as_str())
            .filter(|name| !valid_names.contains(name))
            .collect();
        if !invalid.is_empty() {
            return Err(SemaviewError::IncompatibleSelection(format!(
                "metrics not valid for the given dimensions: {}",
                invalid.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(valid)
    }

    /// Catalog dimensions usable with `metrics`. Fails when any of
    /// `requested` is not among them.
    pub fn valid_dimensions(
        &self,
        metrics: &[Metric],
        requested: &[Dimension],
    ) -> Result<BTreeSet<Dimension>> {
        let valid: BTreeSet<Dimension> = self
            .dimensions
            .iter()
            .filter(|dimension| metrics.iter().all(|m| self.is_compatible(m, dimension)))
            .cloned()
            .collect();

        let invalid: BTreeSet<String> = requested
            .iter()
            .filter(|d| !valid.contains(*d))
            .map(ToString::to_string)
            .collect();
        if !invalid.is_empty() {
            return Err(SemaviewError::IncompatibleSelection(format!(
                "dimensions not valid for the given metrics: {}",
                invalid.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main(name: &str) -> Relation {
        Relation::new(name).with_schema("main")
    }

    fn metric(name: &str, tables: &[&str]) -> Metric {
        Metric {
            name: name.to_string(),
            sql: format!("SELECT COUNT(*) FROM {}", tables[0]),
            expression: "COUNT(*)".to_string(),
            parents: tables.iter().map(|t| main(t)).collect(),
            tables: tables.iter().map(|t| main(t)).collect(),
        }
    }

    fn resolver() -> ValidityResolver {
        let country = Dimension::new(main("customers"), "country");
        let sku = Dimension::new(main("products"), "sku");
        let per_relation = BTreeMap::from([
            (main("orders"), BTreeSet::from([country.clone(), sku.clone()])),
            (main("visits"), BTreeSet::from([country.clone()])),
        ]);
        ValidityResolver::new(
            BTreeSet::from([
                metric("orders", &["orders"]),
                metric("visits", &["visits"]),
                metric("returns", &["returns"]),
            ]),
            BTreeSet::from([country, sku]),
            per_relation,
        )
    }

    #[test]
    fn reachable_dimension_keeps_metric_valid() {
        let country = Dimension::new(main("customers"), "country");
        let valid = resolver()
            .valid_metrics(&[metric("orders", &["orders"])], &[country])
            .unwrap();
        let names: Vec<&str> = valid.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "visits"]);
    }

    #[test]
    fn unreachable_dimension_names_every_offender() {
        let sku = Dimension::new(main("products"), "sku");
        let err = resolver()
            .valid_metrics(
                &[metric("visits", &["visits"]), metric("returns", &["returns"])],
                &[sku],
            )
            .unwrap_err();
        match err {
            SemaviewError::IncompatibleSelection(msg) => assert!(msg.ends_with("returns, visits")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn dimensions_are_checked_against_every_metric_table() {
        let sku = Dimension::new(main("products"), "sku");
        let valid = resolver()
            .valid_dimensions(&[metric("orders", &["orders"])], &[sku.clone()])
            .unwrap();
        assert!(valid.contains(&sku));

        let err = resolver()
            .valid_dimensions(&[metric("both", &["orders", "visits"])], &[sku])
            .unwrap_err();
        assert!(matches!(err, SemaviewError::IncompatibleSelection(msg) if msg.contains("products.sku")));
    }
}
