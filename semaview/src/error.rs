use thiserror::Error;

pub type Result<T> = std::result::Result<T, SemaviewError>;

#[derive(Debug, Error)]
pub enum SemaviewError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sql parse error: {0}")]
    Parse(#[from] sqlparser::parser::ParserError),
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid metric SQL: {0}")]
    ShapeViolation(String),
    #[error("incompatible selection: {0}")]
    IncompatibleSelection(String),
    #[error("unsupported metric expression: {0}")]
    UnsupportedRewrite(String),
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
