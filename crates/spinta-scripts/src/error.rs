use std::path::PathBuf;

use serde_json::{Map, Value};
use spinta_backends::BackendError;
use spinta_core::{CoreError, ErrorCode, Reportable};
use spinta_keymap::KeymapError;
use spinta_manifest::ManifestError;
use thiserror::Error;

use crate::script::ScriptType;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{script_type} script '{name}' not found")]
    ScriptNotFound { script_type: ScriptType, name: String },

    #[error("{script_type} script '{name}' is already registered")]
    DuplicateScript { script_type: ScriptType, name: String },

    #[error("clients keymap file not found: {}", path.display())]
    ClientsKeymapNotFound { path: PathBuf },

    #[error("clients id folder not found: {}", path.display())]
    ClientsIdFolderNotFound { path: PathBuf },

    #[error("clients need to be migrated, run `spinta upgrade clients`")]
    ClientsMigrationRequired { path: PathBuf },

    #[error("client '{0}' not found")]
    ClientNotFound(String),

    #[error("invalid client file {}: {message}", path.display())]
    InvalidClient { path: PathBuf, message: String },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Keymap(#[from] KeymapError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ScriptError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ScriptError {
        let path = path.into();
        move |source| ScriptError::Io { path, source }
    }
}

impl Reportable for ScriptError {
    fn code(&self) -> ErrorCode {
        match self {
            ScriptError::ScriptNotFound { .. } => ErrorCode::ScriptNotFound,
            ScriptError::DuplicateScript { .. } => ErrorCode::ConfigError,
            ScriptError::ClientsKeymapNotFound { .. } => ErrorCode::ClientsKeymapNotFound,
            ScriptError::ClientsIdFolderNotFound { .. } => ErrorCode::ClientsIdFolderNotFound,
            ScriptError::ClientsMigrationRequired { .. } => ErrorCode::ClientsMigrationRequired,
            ScriptError::ClientNotFound(_) | ScriptError::InvalidClient { .. } => ErrorCode::InvalidValue,
            ScriptError::Io { .. } | ScriptError::Yaml(_) => ErrorCode::IoError,
            ScriptError::Core(e) => e.code(),
            ScriptError::Manifest(e) => e.code(),
            ScriptError::Keymap(e) => e.code(),
            ScriptError::Backend(e) => e.code(),
        }
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        match self {
            ScriptError::ScriptNotFound { script_type, name }
            | ScriptError::DuplicateScript { script_type, name } => {
                context.insert("type".into(), Value::from(script_type.as_str()));
                context.insert("script".into(), Value::from(name.as_str()));
            }
            ScriptError::ClientsKeymapNotFound { path }
            | ScriptError::ClientsIdFolderNotFound { path }
            | ScriptError::ClientsMigrationRequired { path }
            | ScriptError::InvalidClient { path, .. }
            | ScriptError::Io { path, .. } => {
                context.insert("path".into(), Value::from(path.display().to_string()));
            }
            ScriptError::ClientNotFound(client) => {
                context.insert("client".into(), Value::from(client.as_str()));
            }
            ScriptError::Core(e) => return e.context(),
            ScriptError::Manifest(e) => return e.context(),
            ScriptError::Keymap(e) => return e.context(),
            ScriptError::Backend(e) => return e.context(),
            ScriptError::Yaml(_) => {}
        }
        context
    }
}
