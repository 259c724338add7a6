pub mod backends;
pub mod config;
pub mod dialect;
pub mod dimensions;
pub mod error;
pub mod executor;
pub mod layer;
pub mod metrics;
pub mod models;
pub mod query_builder;
pub mod relations;
pub mod schema;
pub mod sql_ast;
pub mod sql_parse;
pub mod validity;

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing when a global subscriber is already set.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub use backends::{BackendConnection, ConnectionManager, IntrospectionQueries};
pub use config::{CompilerConfig, SemaviewConfig};
pub use dialect::Dialect;
pub use dimensions::{DimensionDiscovery, ForeignKeyDiscovery};
pub use error::{Result, SemaviewError};
pub use executor::QueryResult;
pub use layer::SemanticLayer;
pub use metrics::MetricExtractor;
pub use models::{
    Dimension, Filter, FilterKind, Metric, Query, QueryRequest, Relation, RelationDefaults,
    SemanticView, Sort, SortDirection,
};
pub use query_builder::SqlBuilder;
pub use relations::ViewCatalog;
pub use schema::{ForeignKey, SchemaSnapshot};
pub use validity::ValidityResolver;
