//! Stable error identifiers and the error envelope

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Closed set of error identifiers reported by the API and the CLI.
///
/// The identifier strings are part of the external interface and must not
/// change. The three infrastructure codes at the end cover failures that
/// are not about user input (IO, database drivers, configuration files).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    TabularManifestError,
    PropertyNotFound,
    ModelNotFound,
    MissingRefModel,
    DatasetNameMissmatch,
    ModifyOneDatasetSchema,
    DatasetSchemaRequiresIds,
    ModifySchemaRequiresFile,
    UnknownContentType,
    FileSizeTooLarge,
    InvalidName,
    InvalidSchemaUrlPath,
    InsufficientScopeError,
    NoPrimaryKeyCandidatesFound,
    KeyMapGivenKeyMissmatch,
    KeyMapKeyNotFound,
    KeymapDuplicateMapping,
    KeymapMigrationRequired,
    ClientsKeymapNotFound,
    ClientsIdFolderNotFound,
    ClientsMigrationRequired,
    ScriptNotFound,
    InvalidValue,
    SpynaSyntaxError,
    ConfigError,
    BackendError,
    IoError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TabularManifestError => "TabularManifestError",
            ErrorCode::PropertyNotFound => "PropertyNotFound",
            ErrorCode::ModelNotFound => "ModelNotFound",
            ErrorCode::MissingRefModel => "MissingRefModel",
            ErrorCode::DatasetNameMissmatch => "DatasetNameMissmatch",
            ErrorCode::ModifyOneDatasetSchema => "ModifyOneDatasetSchema",
            ErrorCode::DatasetSchemaRequiresIds => "DatasetSchemaRequiresIds",
            ErrorCode::ModifySchemaRequiresFile => "ModifySchemaRequiresFile",
            ErrorCode::UnknownContentType => "UnknownContentType",
            ErrorCode::FileSizeTooLarge => "FileSizeTooLarge",
            ErrorCode::InvalidName => "InvalidName",
            ErrorCode::InvalidSchemaUrlPath => "InvalidSchemaUrlPath",
            ErrorCode::InsufficientScopeError => "InsufficientScopeError",
            ErrorCode::NoPrimaryKeyCandidatesFound => "NoPrimaryKeyCandidatesFound",
            ErrorCode::KeyMapGivenKeyMissmatch => "KeyMapGivenKeyMissmatch",
            ErrorCode::KeyMapKeyNotFound => "KeyMapKeyNotFound",
            ErrorCode::KeymapDuplicateMapping => "KeymapDuplicateMapping",
            ErrorCode::KeymapMigrationRequired => "KeymapMigrationRequired",
            ErrorCode::ClientsKeymapNotFound => "ClientsKeymapNotFound",
            ErrorCode::ClientsIdFolderNotFound => "ClientsIdFolderNotFound",
            ErrorCode::ClientsMigrationRequired => "ClientsMigrationRequired",
            ErrorCode::ScriptNotFound => "ScriptNotFound",
            ErrorCode::InvalidValue => "InvalidValue",
            ErrorCode::SpynaSyntaxError => "SpynaSyntaxError",
            ErrorCode::ConfigError => "ConfigError",
            ErrorCode::BackendError => "BackendError",
            ErrorCode::IoError => "IoError",
        }
    }

    /// HTTP status used when the error is rendered as an API response
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InsufficientScopeError => 403,
            ErrorCode::ModelNotFound
            | ErrorCode::PropertyNotFound
            | ErrorCode::KeyMapKeyNotFound
            | ErrorCode::ScriptNotFound
            | ErrorCode::ClientsKeymapNotFound
            | ErrorCode::ClientsIdFolderNotFound => 404,
            ErrorCode::UnknownContentType => 415,
            ErrorCode::KeymapMigrationRequired
            | ErrorCode::ClientsMigrationRequired
            | ErrorCode::ConfigError
            | ErrorCode::BackendError
            | ErrorCode::IoError => 500,
            _ => 400,
        }
    }

    /// CLI exit code: 1 for configuration or validation failures, 2 for
    /// runtime backend failures
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::BackendError | ErrorCode::IoError => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every crate-level error so it can be reported uniformly
pub trait Reportable: std::error::Error {
    fn code(&self) -> ErrorCode;

    /// Structured details (row numbers, names, counts)
    fn context(&self) -> Map<String, Value> {
        Map::new()
    }

    fn to_entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code().as_str().to_string(),
            message: self.to_string(),
            context: self.context(),
        }
    }
}

/// One entry of the error envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

/// `{"errors": [{"code": ..., "message": ..., "context": {...}}]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub errors: Vec<ErrorEntry>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_error(error: &dyn Reportable) -> Self {
        Self {
            errors: vec![error.to_entry()],
        }
    }

    pub fn push(&mut self, error: &dyn Reportable) {
        self.errors.push(error.to_entry());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"errors":[]}"#))
    }
}

/// Errors raised by the core crate itself
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid value {value:?} for {field}")]
    InvalidValue { field: String, value: String },

    #[error("resource '{0}' is not attached to the context")]
    ResourceNotFound(String),

    #[error("resource '{name}' has a different type than requested")]
    ResourceType { name: String },

    #[error("resource '{name}' failed to initialize: {message}")]
    ResourceInit { name: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Reportable for CoreError {
    fn code(&self) -> ErrorCode {
        match self {
            CoreError::InvalidValue { .. } => ErrorCode::InvalidValue,
            CoreError::Io(_) => ErrorCode::IoError,
            _ => ErrorCode::ConfigError,
        }
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        match self {
            CoreError::InvalidValue { field, value } => {
                context.insert("field".into(), Value::String(field.clone()));
                context.insert("value".into(), Value::String(value.clone()));
            }
            CoreError::ResourceNotFound(name)
            | CoreError::ResourceType { name }
            | CoreError::ResourceInit { name, .. } => {
                context.insert("resource".into(), Value::String(name.clone()));
            }
            _ => {}
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::TabularManifestError.http_status(), 400);
        assert_eq!(ErrorCode::InsufficientScopeError.http_status(), 403);
        assert_eq!(ErrorCode::ModelNotFound.http_status(), 404);
        assert_eq!(ErrorCode::UnknownContentType.http_status(), 415);
        assert_eq!(ErrorCode::BackendError.http_status(), 500);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ErrorCode::MissingRefModel.exit_code(), 1);
        assert_eq!(ErrorCode::BackendError.exit_code(), 2);
    }

    #[test]
    fn test_report_envelope() {
        let error = CoreError::InvalidValue {
            field: "level".into(),
            value: "9".into(),
        };
        let report = ErrorReport::from_error(&error);
        let json: Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["errors"][0]["code"], "InvalidValue");
        assert_eq!(json["errors"][0]["context"]["field"], "level");
    }

    #[test]
    fn test_empty_context_is_omitted() {
        let error = CoreError::Config("missing".into());
        let json = ErrorReport::from_error(&error).to_json();
        assert!(!json.contains("context"));
    }
}
