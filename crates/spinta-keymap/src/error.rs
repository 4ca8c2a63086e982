use serde_json::{Map, Value};
use spinta_core::{ErrorCode, Reportable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeymapError {
    #[error("given key '{given}' does not match '{found}' already mapped in '{name}'")]
    GivenKeyMissmatch {
        name: String,
        given: String,
        found: String,
    },

    #[error("key '{key}' is already mapped to another value in '{name}'")]
    KeyTaken { name: String, key: String },

    #[error("key '{key}' not found in '{name}'")]
    KeyNotFound { name: String, key: String },

    #[error("'{name}' has {key_count} duplicated values over {affected_count} rows")]
    DuplicateMapping {
        name: String,
        key_count: usize,
        affected_count: usize,
    },

    #[error("keymap requires migrations: {}", .missing.join(", "))]
    MigrationRequired { missing: Vec<String> },

    #[error("redirect loop at '{key}' in '{name}'")]
    RedirectLoop { name: String, key: String },

    #[error("unsupported keymap dsn '{0}'")]
    UnsupportedDsn(String),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Reportable for KeymapError {
    fn code(&self) -> ErrorCode {
        match self {
            KeymapError::GivenKeyMissmatch { .. } | KeymapError::KeyTaken { .. } => {
                ErrorCode::KeyMapGivenKeyMissmatch
            }
            KeymapError::KeyNotFound { .. } | KeymapError::RedirectLoop { .. } => {
                ErrorCode::KeyMapKeyNotFound
            }
            KeymapError::DuplicateMapping { .. } => ErrorCode::KeymapDuplicateMapping,
            KeymapError::MigrationRequired { .. } => ErrorCode::KeymapMigrationRequired,
            KeymapError::UnsupportedDsn(_) => ErrorCode::ConfigError,
            KeymapError::Sql(_) | KeymapError::Json(_) => ErrorCode::BackendError,
        }
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        match self {
            KeymapError::GivenKeyMissmatch { name, given, found } => {
                context.insert("model".into(), Value::from(name.as_str()));
                context.insert("given".into(), Value::from(given.as_str()));
                context.insert("found".into(), Value::from(found.as_str()));
            }
            KeymapError::KeyNotFound { name, key }
            | KeymapError::RedirectLoop { name, key }
            | KeymapError::KeyTaken { name, key } => {
                context.insert("model".into(), Value::from(name.as_str()));
                context.insert("key".into(), Value::from(key.as_str()));
            }
            KeymapError::DuplicateMapping {
                name,
                key_count,
                affected_count,
            } => {
                context.insert("model".into(), Value::from(name.as_str()));
                context.insert("key_count".into(), Value::from(*key_count));
                context.insert("affected_count".into(), Value::from(*affected_count));
            }
            KeymapError::MigrationRequired { missing } => {
                context.insert("migrations".into(), Value::from(missing.clone()));
            }
            _ => {}
        }
        context
    }
}
