use std::env;
use std::sync::Arc;

use semaview::backends::DuckDbConnection;
use semaview::{SemanticLayer, SemanticView, SemaviewConfig};

fn usage() {
    eprintln!("Usage: print_sql <database.duckdb> <semantic_view> <pseudo_sql>");
    eprintln!("Example: cargo run --example print_sql -- shop.duckdb main \"SELECT revenue, country FROM main\"");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    semaview::init_tracing();
    let args = env::args().skip(1).collect::<Vec<_>>();
    let [database, view, sql] = args.as_slice() else {
        usage();
        std::process::exit(1);
    };

    let config = SemaviewConfig::load_default().for_datasource(database);
    let backend = DuckDbConnection::from_config(database, &config);
    let layer = SemanticLayer::with_config(Arc::new(backend), config);

    let query = layer
        .query_from_standard_sql(&SemanticView::new(view.as_str()), sql)
        .await?;
    println!("{}", query.sql);
    Ok(())
}
