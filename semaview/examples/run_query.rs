use std::env;
use std::sync::Arc;

use semaview::backends::DuckDbConnection;
use semaview::{SemanticLayer, SemanticView};

/// Lists the catalog of a DuckDB file, or runs a pseudo-SQL query against it.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    semaview::init_tracing();
    let args = env::args().skip(1).collect::<Vec<_>>();
    let Some(database) = args.first() else {
        eprintln!("Usage: run_query <database.duckdb> [<semantic_view> <pseudo_sql>]");
        std::process::exit(1);
    };
    let layer = SemanticLayer::new(Arc::new(DuckDbConnection::new(database)));

    let (view, sql) = match (args.get(1), args.get(2)) {
        (Some(view), Some(sql)) => (SemanticView::new(view.as_str()), sql),
        _ => {
            for view in layer.semantic_views().await? {
                println!("{}", view.name);
                for metric in layer.metrics(&view).await? {
                    println!("  metric    {} = {}", metric.name, metric.expression);
                }
                for dimension in layer.dimensions(&view).await? {
                    println!("  dimension {dimension}");
                }
            }
            return Ok(());
        }
    };

    let query = layer.query_from_standard_sql(&view, sql).await?;
    println!("{}", query.sql);
    let result = layer.execute(&query).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
