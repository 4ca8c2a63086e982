use serde_json::{Map, Value};
use spinta_core::{ErrorCode, Reportable};
use spinta_keymap::KeymapError;
use spinta_manifest::ManifestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown backend type '{0}'")]
    UnknownBackendType(String),

    #[error("no SQL dialect registered for '{0}'")]
    UnknownDialect(String),

    #[error("unsupported dsn '{0}'")]
    UnsupportedDsn(String),

    #[error("backend '{name}' is not ready: {message}")]
    NotReady { name: String, message: String },

    #[error("backend '{0}' has no open connection")]
    NotConnected(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("column '{column}' not found in '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("no backend named '{0}'")]
    BackendNotFound(String),

    #[error("cannot compile expression: {0}")]
    UnsupportedExpr(String),

    #[error("no primary key candidates found for table '{table}'")]
    NoPrimaryKeyCandidates { table: String },

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Keymap(#[from] KeymapError),
}

impl Reportable for BackendError {
    fn code(&self) -> ErrorCode {
        match self {
            BackendError::UnknownBackendType(_)
            | BackendError::UnknownDialect(_)
            | BackendError::UnsupportedDsn(_)
            | BackendError::BackendNotFound(_) => ErrorCode::ConfigError,
            BackendError::ColumnNotFound { .. } => ErrorCode::PropertyNotFound,
            BackendError::UnsupportedExpr(_) => ErrorCode::InvalidValue,
            BackendError::NoPrimaryKeyCandidates { .. } => ErrorCode::NoPrimaryKeyCandidatesFound,
            BackendError::Manifest(e) => e.code(),
            BackendError::Keymap(e) => e.code(),
            _ => ErrorCode::BackendError,
        }
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        match self {
            BackendError::Manifest(e) => return e.context(),
            BackendError::Keymap(e) => return e.context(),
            BackendError::NotReady { name, .. } => {
                context.insert("backend".into(), Value::from(name.as_str()));
            }
            BackendError::TableNotFound(table) | BackendError::NoPrimaryKeyCandidates { table } => {
                context.insert("table".into(), Value::from(table.as_str()));
            }
            BackendError::ColumnNotFound { table, column } => {
                context.insert("table".into(), Value::from(table.as_str()));
                context.insert("property".into(), Value::from(column.as_str()));
            }
            _ => {}
        }
        context
    }
}
