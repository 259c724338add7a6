//! Integration tests for the compiler.
//!
//! These tests exercise the public API: ViewCatalog, MetricExtractor,
//! SqlBuilder, QueryRequest, against an in-memory schema snapshot.

use semaview::dialect::{DuckDbDialect, MySqlDialect, PostgresDialect, SqliteDialect};
use semaview::{
    CompilerConfig, Dialect, Dimension, Filter, ForeignKey, Metric, MetricExtractor, QueryRequest,
    Relation, RelationDefaults, SchemaSnapshot, SemanticView, SemaviewError, Sort, SortDirection,
    SqlBuilder, ViewCatalog,
};

// ============================================================================
// Test fixtures
// ============================================================================

mod fixtures {
    use super::*;

    pub fn main(name: &str) -> Relation {
        Relation::new(name).with_schema("main")
    }

    /// orders -> customers -> regions, orders -> products.
    pub fn shop() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table(
                main("orders"),
                ["id", "customer_id", "product_id", "amount", "status"],
            )
            .with_table(
                main("customers"),
                ["id", "name", "country", "region_id", "status"],
            )
            .with_table(main("products"), ["id", "name", "category"])
            .with_table(main("regions"), ["id", "label"])
            .with_foreign_key(ForeignKey::new(
                main("orders"),
                "customer_id",
                main("customers"),
                "id",
            ))
            .with_foreign_key(ForeignKey::new(
                main("orders"),
                "product_id",
                main("products"),
                "id",
            ))
            .with_foreign_key(ForeignKey::new(
                main("customers"),
                "region_id",
                main("regions"),
                "id",
            ))
            .with_view(
                main("revenue"),
                "CREATE VIEW revenue AS SELECT SUM(amount) AS revenue FROM orders",
            )
            .with_view(
                main("paid_revenue"),
                "CREATE VIEW paid_revenue AS SELECT SUM(amount) AS paid_revenue FROM orders WHERE status = 'paid'",
            )
            .with_view(
                main("order_count"),
                "CREATE VIEW order_count AS SELECT COUNT(*) AS order_count FROM orders",
            )
            .with_view(
                main("order_ids"),
                "CREATE VIEW order_ids AS SELECT COUNT(id) AS order_ids FROM orders WHERE status = 'paid'",
            )
            .with_view(
                main("customer_count"),
                "CREATE VIEW customer_count AS SELECT COUNT(*) AS customer_count FROM customers",
            )
    }

    pub fn metric(dialect: &dyn Dialect, name: &str) -> Metric {
        let snapshot = shop();
        let catalog =
            ViewCatalog::new(dialect, RelationDefaults::for_dialect(dialect), &snapshot).unwrap();
        MetricExtractor::new(&catalog)
            .metrics()
            .unwrap()
            .into_iter()
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("no metric named {name}"))
    }

    pub fn request(dialect: &dyn Dialect, metrics: &[&str]) -> QueryRequest {
        QueryRequest::new(
            SemanticView::new("main"),
            metrics.iter().map(|name| metric(dialect, name)).collect(),
        )
    }

    pub fn country() -> Dimension {
        Dimension::new(main("customers"), "country")
    }

    pub fn compile(dialect: &dyn Dialect, request: &QueryRequest) -> Result<String, SemaviewError> {
        SqlBuilder::default()
            .with_defaults(RelationDefaults::new(Some("main".to_string()), None))
            .build_with_dialect(&shop(), request, dialect)
            .map(|query| query.sql)
    }
}

use fixtures::*;

// ============================================================================
// Single context
// ============================================================================

#[test]
fn single_metric_with_dimension_joins_along_the_foreign_key() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.dimensions = vec![country()];
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT SUM(orders.amount) AS revenue, customers.country FROM orders \
         LEFT JOIN customers ON orders.customer_id = customers.id \
         GROUP BY customers.country"
    );
}

#[test]
fn single_predicate_becomes_the_where_clause() {
    let req = request(&SqliteDialect, &["paid_revenue"]);
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT SUM(amount) AS paid_revenue FROM orders WHERE status = 'paid'"
    );
}

#[test]
fn differing_predicates_use_case_without_filter_clause() {
    let mut req = request(&SqliteDialect, &["revenue", "paid_revenue"]);
    req.dimensions = vec![country()];
    req.sort = Some(Sort::new(["revenue"], SortDirection::Desc));
    req.limit = Some(10);
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT SUM(orders.amount) AS revenue, \
         SUM(CASE WHEN orders.status = 'paid' THEN orders.amount ELSE 0 END) AS paid_revenue, \
         customers.country FROM orders \
         LEFT JOIN customers ON orders.customer_id = customers.id \
         GROUP BY customers.country ORDER BY revenue DESC LIMIT 10"
    );
}

#[test]
fn differing_predicates_use_filter_clause_when_available() {
    let req = request(&DuckDbDialect, &["revenue", "paid_revenue"]);
    assert_eq!(
        compile(&DuckDbDialect, &req).unwrap(),
        "SELECT SUM(amount) AS revenue, \
         SUM(amount) FILTER (WHERE status = 'paid') AS paid_revenue FROM orders"
    );
}

#[test]
fn filter_clause_can_be_switched_off() {
    let req = request(&DuckDbDialect, &["revenue", "paid_revenue"]);
    let builder = SqlBuilder::new(CompilerConfig {
        native_filter_clause: false,
        cte: true,
    });
    let sql = builder
        .build_with_dialect(&shop(), &req, &DuckDbDialect)
        .unwrap()
        .sql;
    assert!(sql.contains("SUM(CASE WHEN status = 'paid' THEN amount ELSE 0 END) AS paid_revenue"));
}

#[test]
fn where_and_having_filters() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.dimensions = vec![country()];
    req.filters = vec![
        Filter::where_("customers.country <> 'FR'"),
        Filter::having("revenue > 100"),
    ];
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT SUM(orders.amount) AS revenue, customers.country FROM orders \
         LEFT JOIN customers ON orders.customer_id = customers.id \
         WHERE customers.country <> 'FR' GROUP BY customers.country \
         HAVING SUM(orders.amount) > 100"
    );
}

#[test]
fn where_filter_on_another_table_adds_its_join() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.filters = vec![Filter::where_("products.category = 'books'")];
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT SUM(orders.amount) AS revenue FROM orders \
         LEFT JOIN products ON orders.product_id = products.id \
         WHERE products.category = 'books'"
    );
}

#[test]
fn shared_column_names_are_disambiguated() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.dimensions = vec![
        Dimension::new(main("customers"), "name"),
        Dimension::new(main("products"), "name"),
    ];
    req.sort = Some(Sort::new(["products.name"], SortDirection::Asc));
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT SUM(orders.amount) AS revenue, customers.name AS customers_name, \
         products.name AS products_name FROM orders \
         LEFT JOIN customers ON orders.customer_id = customers.id \
         LEFT JOIN products ON orders.product_id = products.id \
         GROUP BY customers.name, products.name ORDER BY products_name ASC"
    );
}

#[test]
fn offset_without_limit_is_dialect_specific() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.offset = Some(5);
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT SUM(amount) AS revenue FROM orders LIMIT -1 OFFSET 5"
    );
    assert_eq!(
        compile(&PostgresDialect, &req).unwrap(),
        "SELECT SUM(amount) AS revenue FROM orders OFFSET 5"
    );
}

#[test]
fn metric_columns_are_qualified_once_tables_are_joined() {
    let mut req = request(&SqliteDialect, &["order_ids"]);
    req.dimensions = vec![country()];
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "SELECT COUNT(orders.id) AS order_ids, customers.country FROM orders \
         LEFT JOIN customers ON orders.customer_id = customers.id \
         WHERE orders.status = 'paid' GROUP BY customers.country"
    );

    let unjoined = request(&SqliteDialect, &["order_ids"]);
    assert_eq!(
        compile(&SqliteDialect, &unjoined).unwrap(),
        "SELECT COUNT(id) AS order_ids FROM orders WHERE status = 'paid'"
    );
}

#[test]
fn limit_and_offset_together() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.limit = Some(10);
    req.offset = Some(20);
    let dialects: [&dyn Dialect; 3] = [&SqliteDialect, &PostgresDialect, &MySqlDialect];
    for dialect in dialects {
        assert_eq!(
            compile(dialect, &req).unwrap(),
            "SELECT SUM(amount) AS revenue FROM orders LIMIT 10 OFFSET 20"
        );
    }
}

// ============================================================================
// Multiple contexts
// ============================================================================

#[test]
fn contexts_are_recombined_with_ctes() {
    let mut req = request(&SqliteDialect, &["order_count", "customer_count"]);
    req.dimensions = vec![country()];
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "WITH context_0 AS (SELECT COUNT(*) AS order_count, customers.country FROM orders \
         LEFT JOIN customers ON orders.customer_id = customers.id GROUP BY customers.country), \
         context_1 AS (SELECT COUNT(*) AS customer_count, customers.country FROM customers \
         GROUP BY customers.country) \
         SELECT context_0.order_count AS order_count, context_1.customer_count AS customer_count, \
         context_0.country FROM context_0 CROSS JOIN context_1 \
         WHERE context_0.country = context_1.country"
    );
}

#[test]
fn having_across_contexts_filters_the_recombined_query() {
    let mut req = request(&SqliteDialect, &["order_count", "customer_count"]);
    req.filters = vec![Filter::having("order_count > customer_count")];
    assert_eq!(
        compile(&SqliteDialect, &req).unwrap(),
        "WITH context_0 AS (SELECT COUNT(*) AS order_count FROM orders), \
         context_1 AS (SELECT COUNT(*) AS customer_count FROM customers) \
         SELECT context_0.order_count AS order_count, context_1.customer_count AS customer_count \
         FROM context_0 CROSS JOIN context_1 \
         WHERE context_0.order_count > context_1.customer_count"
    );
}

#[test]
fn having_on_a_dimension_reads_it_from_the_first_context() {
    let mut req = request(&SqliteDialect, &["order_count", "customer_count"]);
    req.dimensions = vec![country()];
    req.filters = vec![Filter::having("country <> 'DE'")];
    let sql = compile(&SqliteDialect, &req).unwrap();
    assert!(sql.ends_with(
        "FROM context_0 CROSS JOIN context_1 \
         WHERE context_0.country = context_1.country AND context_0.country <> 'DE'"
    ));
}

#[test]
fn without_ctes_and_dimensions_each_metric_is_a_scalar_subquery() {
    let req = request(&MySqlDialect, &["order_count", "customer_count"]);
    assert_eq!(
        compile(&MySqlDialect, &req).unwrap(),
        "SELECT (SELECT COUNT(*) AS order_count FROM orders) AS order_count, \
         (SELECT COUNT(*) AS customer_count FROM customers) AS customer_count"
    );
}

#[test]
fn without_ctes_dimensions_use_derived_tables() {
    let mut req = request(&MySqlDialect, &["order_count", "customer_count"]);
    req.dimensions = vec![country()];
    let sql = compile(&MySqlDialect, &req).unwrap();
    assert!(sql.starts_with(
        "SELECT context_0.order_count AS order_count, \
         context_1.customer_count AS customer_count, context_0.country FROM (SELECT"
    ));
    assert!(sql.contains(") AS context_0 CROSS JOIN (SELECT COUNT(*) AS customer_count"));
    assert!(sql.ends_with(") AS context_1 WHERE context_0.country = context_1.country"));
    assert!(!sql.contains("WITH"));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn unreachable_dimension_is_incompatible() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.dimensions = vec![Dimension::new(main("regions"), "label")];
    assert!(matches!(
        compile(&SqliteDialect, &req),
        Err(SemaviewError::IncompatibleSelection(_))
    ));
}

#[test]
fn unknown_sort_field_and_empty_request_are_rejected() {
    let mut req = request(&SqliteDialect, &["revenue"]);
    req.sort = Some(Sort::new(["nope"], SortDirection::Asc));
    assert!(matches!(
        compile(&SqliteDialect, &req),
        Err(SemaviewError::Validation(_))
    ));

    let empty = QueryRequest::new(SemanticView::new("main"), Vec::new());
    assert!(matches!(
        compile(&SqliteDialect, &empty),
        Err(SemaviewError::Validation(_))
    ));
}

#[test]
fn metric_that_is_not_metric_shaped_is_a_shape_violation() {
    let mut metric = metric(&SqliteDialect, "revenue");
    metric.sql = "SELECT SUM(amount) FROM orders JOIN customers ON 1 = 1".to_string();
    let req = QueryRequest::new(SemanticView::new("main"), vec![metric]);
    match compile(&SqliteDialect, &req) {
        Err(SemaviewError::ShapeViolation(msg)) => assert!(msg.contains("revenue")),
        other => panic!("expected a shape violation, got {other:?}"),
    }
}

#[test]
fn compiling_is_deterministic() {
    let mut req = request(&PostgresDialect, &["order_count", "customer_count", "revenue"]);
    req.dimensions = vec![country()];
    let first = compile(&PostgresDialect, &req).unwrap();
    for _ in 0..5 {
        assert_eq!(compile(&PostgresDialect, &req).unwrap(), first);
    }
}
