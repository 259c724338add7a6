//! Configuration system for semaview.
//!
//! TOML configuration with global defaults and per-datasource overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{Result, SemaviewError};
use crate::models::RelationDefaults;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SemaviewConfig {
    /// Global defaults applied to all datasources unless overridden.
    pub defaults: GlobalDefaults,

    /// Per-datasource configuration overrides (keyed by datasource name).
    pub datasources: HashMap<String, DatasourceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalDefaults {
    pub compiler: CompilerConfig,
    pub pool: PoolConfig,
}

/// Switches for dialect capabilities. Turning one off forces the fallback
/// rendering; turning one on never enables a construct the dialect lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Use `agg(...) FILTER (WHERE ...)` when the dialect has it (default: true).
    pub native_filter_clause: bool,
    /// Recombine contexts with a `WITH` clause when the dialect has it (default: true).
    pub cte: bool,
}

/// Connection pooling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent statements per datasource (default: 16).
    pub size: usize,
}

/// Per-datasource configuration (can override globals).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DatasourceConfig {
    pub compiler: Option<CompilerConfig>,
    pub pool: Option<PoolConfig>,

    /// Schema assumed for unqualified relations (default: the dialect's).
    pub default_schema: Option<String>,
    /// Catalog assumed for unqualified relations (default: the dialect's).
    pub default_catalog: Option<String>,

    pub duckdb: Option<DuckDbConfig>,
    pub sqlite: Option<SqliteConfig>,
    pub postgres: Option<PostgresConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DuckDbConfig {
    /// Maximum concurrent queries (default: 16).
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Maximum concurrent queries (default: 4).
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Connection pool size (overrides pool.size for Postgres).
    pub pool_size: usize,
    /// Statement timeout in milliseconds (0 = server default).
    pub statement_timeout_ms: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            native_filter_clause: true,
            cte: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { size: 16 }
    }
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            statement_timeout_ms: 30_000,
        }
    }
}

impl SemaviewConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SemaviewError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| SemaviewError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `SEMAVIEW_CONFIG` environment variable
    /// 2. `./semaview.toml`
    /// 3. `~/.config/semaview/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("SEMAVIEW_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from SEMAVIEW_CONFIG");
                    return cfg;
                }
                Err(err) => tracing::warn!(path = %path, error = %err, "ignoring SEMAVIEW_CONFIG"),
            }
        }

        if let Ok(cfg) = Self::from_file("semaview.toml") {
            tracing::info!("loaded config from ./semaview.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("semaview").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Resolved config for a datasource (merges global defaults).
    pub fn for_datasource(&self, name: &str) -> ResolvedDatasourceConfig {
        ResolvedDatasourceConfig::merge(&self.defaults, self.datasources.get(name))
    }
}

/// Fully resolved configuration for a datasource.
#[derive(Debug, Clone)]
pub struct ResolvedDatasourceConfig {
    pub compiler: CompilerConfig,
    pub pool: PoolConfig,
    pub default_schema: Option<String>,
    pub default_catalog: Option<String>,
    pub duckdb: DuckDbConfig,
    pub sqlite: SqliteConfig,
    pub postgres: PostgresConfig,
}

impl ResolvedDatasourceConfig {
    fn merge(defaults: &GlobalDefaults, override_cfg: Option<&DatasourceConfig>) -> Self {
        match override_cfg {
            Some(ds) => Self {
                compiler: ds.compiler.unwrap_or(defaults.compiler),
                pool: ds.pool.clone().unwrap_or_else(|| defaults.pool.clone()),
                default_schema: ds.default_schema.clone(),
                default_catalog: ds.default_catalog.clone(),
                duckdb: ds.duckdb.clone().unwrap_or_default(),
                sqlite: ds.sqlite.clone().unwrap_or_default(),
                postgres: ds.postgres.clone().unwrap_or_default(),
            },
            None => Self {
                compiler: defaults.compiler,
                pool: defaults.pool.clone(),
                default_schema: None,
                default_catalog: None,
                duckdb: DuckDbConfig::default(),
                sqlite: SqliteConfig::default(),
                postgres: PostgresConfig::default(),
            },
        }
    }

    /// Relation defaults for `dialect`, with configured overrides applied.
    pub fn relation_defaults(&self, dialect: &dyn Dialect) -> RelationDefaults {
        let dialect_defaults = RelationDefaults::for_dialect(dialect);
        RelationDefaults::new(
            self.default_schema.clone().or(dialect_defaults.schema),
            self.default_catalog.clone().or(dialect_defaults.catalog),
        )
    }
}
