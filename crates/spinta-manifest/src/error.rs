use serde_json::{Map, Value};
use spinta_core::{CoreError, ErrorCode, Reportable};
use spinta_spyna::SpynaError;
use thiserror::Error;

/// Errors raised while reading, linking, checking or writing a manifest.
///
/// Variants discovered while reading rows carry the originating row number
/// (1-based, the header being row 1).
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("row {row}: {message}")]
    Tabular { row: usize, message: String },

    #[error("row {row}: duplicate {kind} '{name}'")]
    DuplicateName {
        row: usize,
        kind: &'static str,
        name: String,
    },

    #[error("row {row}: invalid {field} value {value:?}: {message}")]
    InvalidValue {
        row: usize,
        field: String,
        value: String,
        message: String,
    },

    #[error("row {row}: cannot parse {field} expression: {source}")]
    Expression {
        row: usize,
        field: &'static str,
        #[source]
        source: SpynaError,
    },

    #[error("property '{property}' not found on model '{model}'")]
    PropertyNotFound {
        model: String,
        property: String,
        row: Option<usize>,
    },

    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("row {row}: '{model}.{property}' refers to unknown model '{target}'")]
    MissingRefModel {
        row: usize,
        model: String,
        property: String,
        target: String,
    },

    #[error("schema dataset '{given}' does not match '{expected}'")]
    DatasetNameMissmatch { expected: String, given: String },

    #[error("schema must describe exactly one dataset, got {count}")]
    ModifyOneDatasetSchema { count: usize },

    #[error("row {row}: {dim} '{name}' has no id")]
    DatasetSchemaRequiresIds {
        row: usize,
        dim: &'static str,
        name: String,
    },

    #[error("schema write requires a manifest file")]
    ModifySchemaRequiresFile,

    #[error("unknown content type '{0}', expected text/csv")]
    UnknownContentType(String),

    #[error("schema file is {size} bytes, the limit is {max}")]
    FileSizeTooLarge { size: u64, max: u64 },

    #[error("invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("invalid schema path '{0}'")]
    InvalidSchemaUrlPath(String),

    #[error("no primary key candidates found for '{0}'")]
    NoPrimaryKeyCandidatesFound(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    pub(crate) fn tabular(row: usize, message: impl Into<String>) -> Self {
        ManifestError::Tabular {
            row,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(row: usize, field: &str, value: &str, error: CoreError) -> Self {
        let message = match error {
            CoreError::InvalidValue { .. } => String::from("not allowed here"),
            other => other.to_string(),
        };
        ManifestError::InvalidValue {
            row,
            field: field.to_string(),
            value: value.to_string(),
            message,
        }
    }

    /// Row number the error originated from, when known
    pub fn row(&self) -> Option<usize> {
        match self {
            ManifestError::Tabular { row, .. }
            | ManifestError::DuplicateName { row, .. }
            | ManifestError::InvalidValue { row, .. }
            | ManifestError::Expression { row, .. }
            | ManifestError::MissingRefModel { row, .. }
            | ManifestError::DatasetSchemaRequiresIds { row, .. } => Some(*row),
            ManifestError::PropertyNotFound { row, .. } => *row,
            _ => None,
        }
    }
}

impl Reportable for ManifestError {
    fn code(&self) -> ErrorCode {
        match self {
            ManifestError::Tabular { .. }
            | ManifestError::DuplicateName { .. }
            | ManifestError::Expression { .. }
            | ManifestError::Csv(_) => ErrorCode::TabularManifestError,
            ManifestError::InvalidValue { .. } => ErrorCode::InvalidValue,
            ManifestError::PropertyNotFound { .. } => ErrorCode::PropertyNotFound,
            ManifestError::ModelNotFound(_) => ErrorCode::ModelNotFound,
            ManifestError::MissingRefModel { .. } => ErrorCode::MissingRefModel,
            ManifestError::DatasetNameMissmatch { .. } => ErrorCode::DatasetNameMissmatch,
            ManifestError::ModifyOneDatasetSchema { .. } => ErrorCode::ModifyOneDatasetSchema,
            ManifestError::DatasetSchemaRequiresIds { .. } => ErrorCode::DatasetSchemaRequiresIds,
            ManifestError::ModifySchemaRequiresFile => ErrorCode::ModifySchemaRequiresFile,
            ManifestError::UnknownContentType(_) => ErrorCode::UnknownContentType,
            ManifestError::FileSizeTooLarge { .. } => ErrorCode::FileSizeTooLarge,
            ManifestError::InvalidName { .. } => ErrorCode::InvalidName,
            ManifestError::InvalidSchemaUrlPath(_) => ErrorCode::InvalidSchemaUrlPath,
            ManifestError::NoPrimaryKeyCandidatesFound(_) => {
                ErrorCode::NoPrimaryKeyCandidatesFound
            }
            ManifestError::Migration(_) | ManifestError::Sql(_) | ManifestError::Json(_) => {
                ErrorCode::BackendError
            }
            ManifestError::Io(_) => ErrorCode::IoError,
        }
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        if let Some(row) = self.row() {
            context.insert("row".into(), Value::from(row));
        }
        match self {
            ManifestError::PropertyNotFound {
                model, property, ..
            } => {
                context.insert("model".into(), Value::from(model.as_str()));
                context.insert("property".into(), Value::from(property.as_str()));
            }
            ManifestError::MissingRefModel {
                model,
                property,
                target,
                ..
            } => {
                context.insert("model".into(), Value::from(model.as_str()));
                context.insert("property".into(), Value::from(property.as_str()));
                context.insert("ref".into(), Value::from(target.as_str()));
            }
            ManifestError::ModelNotFound(model) => {
                context.insert("model".into(), Value::from(model.as_str()));
            }
            ManifestError::DatasetNameMissmatch { expected, given } => {
                context.insert("expected".into(), Value::from(expected.as_str()));
                context.insert("dataset".into(), Value::from(given.as_str()));
            }
            ManifestError::InvalidSchemaUrlPath(path) => {
                context.insert("path".into(), Value::from(path.as_str()));
            }
            ManifestError::InvalidValue { field, value, .. } => {
                context.insert("field".into(), Value::from(field.as_str()));
                context.insert("value".into(), Value::from(value.as_str()));
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
    fn test_row_in_context() {
        let error = ManifestError::MissingRefModel {
            row: 7,
            model: "ds/City".into(),
            property: "country".into(),
            target: "Country".into(),
        };
        assert_eq!(error.code(), ErrorCode::MissingRefModel);
        let context = error.context();
        assert_eq!(context["row"], 7);
        assert_eq!(context["ref"], "Country");
    }

    #[test]
    fn test_content_type_is_415() {
        let error = ManifestError::UnknownContentType("application/json".into());
        assert_eq!(error.code().http_status(), 415);
    }
}
