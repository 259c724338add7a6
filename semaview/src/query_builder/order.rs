use crate::error::{Result, SemaviewError};
use crate::models::{Dimension, Sort};
use crate::sql_ast::{OrderItem, SqlExpr};

/// Resolve sort fields against output names; the direction applies to every term.
pub(crate) fn order_items(
    sort: &Sort,
    metric_names: &[String],
    dimensions: &[(Dimension, String)],
) -> Result<Vec<OrderItem>> {
    sort.fields
        .iter()
        .map(|field| {
            let output = if metric_names.iter().any(|name| name == field) {
                field.clone()
            } else if let Some((_, output)) = dimensions
                .iter()
                .find(|(dimension, output)| output == field || dimension.matches(field))
            {
                output.clone()
            } else {
                return Err(SemaviewError::Validation(format!(
                    "cannot sort by `{field}`: not a selected metric or dimension"
                )));
            };
            Ok(OrderItem {
                expr: SqlExpr::column(None, &output),
                direction: sort.direction,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Relation, SortDirection};

    #[test]
    fn every_field_gets_the_direction() {
        let dims = vec![(
            Dimension::new(Relation::new("customers"), "country"),
            "country".to_string(),
        )];
        let sort = Sort::new(["revenue", "customers.country"], SortDirection::Desc);
        let items = order_items(&sort, &["revenue".to_string()], &dims).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.direction == SortDirection::Desc));
        assert_eq!(items[1].expr, SqlExpr::column(None, "country"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let sort = Sort::new(["nope"], SortDirection::Asc);
        assert!(matches!(
            order_items(&sort, &[], &[]),
            Err(SemaviewError::Validation(_))
        ));
    }
}
