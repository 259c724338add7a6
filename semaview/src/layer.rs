//! The semantic layer facade: what a caller talks to.
//!
//! Every call introspects the backend once and works on that snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::backends::BackendConnection;
use crate::config::{ResolvedDatasourceConfig, SemaviewConfig};
use crate::dialect::Dialect;
use crate::dimensions::{DimensionDiscovery, ForeignKeyDiscovery};
use crate::error::{Result, SemaviewError};
use crate::executor::QueryResult;
use crate::metrics::MetricExtractor;
use crate::models::{Dimension, Metric, Query, QueryRequest, RelationDefaults, SemanticView};
use crate::query_builder::{parse_standard_sql, SqlBuilder};
use crate::relations::ViewCatalog;
use crate::schema::SchemaSnapshot;
use crate::validity::ValidityResolver;

/// Discovery, validation and compilation over one backend.
#[derive(Clone)]
pub struct SemanticLayer {
    backend: Arc<dyn BackendConnection>,
    config: ResolvedDatasourceConfig,
}

impl SemanticLayer {
    pub fn new(backend: Arc<dyn BackendConnection>) -> Self {
        Self::with_config(backend, SemaviewConfig::default().for_datasource(""))
    }

    pub fn with_config(backend: Arc<dyn BackendConnection>, config: ResolvedDatasourceConfig) -> Self {
        Self { backend, config }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.backend.dialect()
    }

    fn defaults(&self) -> RelationDefaults {
        self.config.relation_defaults(self.dialect())
    }

    fn builder(&self) -> SqlBuilder {
        SqlBuilder::new(self.config.compiler).with_defaults(self.defaults())
    }

    /// The part of the catalog belonging to `view`.
    async fn snapshot(&self, view: &SemanticView) -> Result<SchemaSnapshot> {
        let snapshot = self.backend.introspect().await?;
        if !snapshot.has_semantic_view(view) {
            return Err(SemaviewError::Validation(format!(
                "unknown semantic view `{}`",
                view.name
            )));
        }
        Ok(snapshot.scoped(view))
    }

    fn metrics_of(&self, snapshot: &SchemaSnapshot) -> Result<BTreeSet<Metric>> {
        let catalog = ViewCatalog::new(self.dialect(), self.defaults(), snapshot)?;
        MetricExtractor::new(&catalog).metrics()
    }

    fn validity_of(&self, snapshot: &SchemaSnapshot) -> Result<ValidityResolver> {
        let discovery = ForeignKeyDiscovery::new(snapshot, self.defaults());
        Ok(ValidityResolver::new(
            self.metrics_of(snapshot)?,
            discovery.discover_dimensions(),
            discovery.discover_dimensions_per_relation(),
        ))
    }

    pub async fn semantic_views(&self) -> Result<BTreeSet<SemanticView>> {
        Ok(self.backend.introspect().await?.semantic_views())
    }

    pub async fn metrics(&self, view: &SemanticView) -> Result<BTreeSet<Metric>> {
        let snapshot = self.snapshot(view).await?;
        self.metrics_of(&snapshot)
    }

    pub async fn dimensions(&self, view: &SemanticView) -> Result<BTreeSet<Dimension>> {
        let snapshot = self.snapshot(view).await?;
        Ok(ForeignKeyDiscovery::new(&snapshot, self.defaults()).discover_dimensions())
    }

    /// Metrics of `view` compatible with every dimension in `dimensions`.
    pub async fn valid_metrics(
        &self,
        view: &SemanticView,
        metrics: &[Metric],
        dimensions: &[Dimension],
    ) -> Result<BTreeSet<Metric>> {
        let snapshot = self.snapshot(view).await?;
        self.validity_of(&snapshot)?.valid_metrics(metrics, dimensions)
    }

    /// Dimensions of `view` compatible with every metric in `metrics`.
    pub async fn valid_dimensions(
        &self,
        view: &SemanticView,
        metrics: &[Metric],
        dimensions: &[Dimension],
    ) -> Result<BTreeSet<Dimension>> {
        let snapshot = self.snapshot(view).await?;
        self.validity_of(&snapshot)?.valid_dimensions(metrics, dimensions)
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<Query> {
        let start = Instant::now();
        let snapshot = self.snapshot(&request.view).await?;
        let query = self
            .builder()
            .build_with_dialect(&snapshot, request, self.dialect())?;
        tracing::debug!(
            view = %request.view.name,
            ms = start.elapsed().as_millis(),
            "semantic query compiled"
        );
        Ok(query)
    }

    /// Compile pseudo-SQL whose `FROM` names `view`.
    pub async fn query_from_standard_sql(&self, view: &SemanticView, sql: &str) -> Result<Query> {
        let snapshot = self.snapshot(view).await?;
        let metrics = self.metrics_of(&snapshot)?;
        let dimensions =
            ForeignKeyDiscovery::new(&snapshot, self.defaults()).discover_dimensions();
        let request = parse_standard_sql(self.dialect(), sql, &metrics, &dimensions)?;
        if request.view != *view {
            return Err(SemaviewError::Validation(format!(
                "query reads `{}` but was issued against `{}`",
                request.view.name, view.name
            )));
        }
        self.builder()
            .build_with_dialect(&snapshot, &request, self.dialect())
    }

    pub async fn execute(&self, query: &Query) -> Result<QueryResult> {
        self.backend.execute_sql(&query.sql).await
    }
}
