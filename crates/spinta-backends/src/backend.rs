//! Backend contract
//!
//! A backend is loaded from its [`BackendConfig`], connects lazily and
//! hands out scoped transactions. Tables are reflected on first use and
//! cached per `(schema, name)`. Relational backends also expose DDL hooks
//! through [`SqlDdl`], which upgrade scripts dispatch on.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use spinta_core::{BackendConfig, Config};
use spinta_manifest::{DataType, Manifest, ModelId, SchemaMigration};
use tracing::info;

use crate::dialect::{Dialect, DialectRegistry};
use crate::error::BackendError;
use crate::sqlite::SqliteBackend;
use crate::table::{TableName, TableType};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    /// Position in the primary key, 1-based
    pub primary_key: usize,
}

/// Reflected table
#[derive(Debug, Clone, PartialEq)]
pub struct TableHandle {
    pub table: TableName,
    pub columns: Vec<ColumnInfo>,
}

impl TableHandle {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Vec<&str> {
        let mut pk: Vec<&ColumnInfo> = self.columns.iter().filter(|c| c.primary_key > 0).collect();
        pk.sort_by_key(|c| c.primary_key);
        pk.into_iter().map(|c| c.name.as_str()).collect()
    }
}

/// Foreign key of a reflected table
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnHandle {
    pub table: TableName,
    pub name: String,
    /// SQL text referring to the column; aliased when selected
    pub expr: String,
}

/// A scoped connection; rolled back when dropped without `commit`
pub trait Transaction {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, BackendError>;

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Map<String, Value>>, BackendError>;

    fn commit(self: Box<Self>) -> Result<(), BackendError>;
}

pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Backend type as configured, e.g. `sql/sqlite`
    fn kind(&self) -> &str;

    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Reflection hook run once the manifest is loaded
    fn prepare(&self, manifest: &Manifest) -> Result<(), BackendError>;

    /// Readiness check; connection failures are reported as `false` unless
    /// `fail` is set
    fn wait(&self, fail: bool) -> Result<bool, BackendError>;

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BackendError>;

    fn get_table(&self, table: &TableName) -> Result<TableHandle, BackendError>;

    fn get_column(
        &self,
        table: &TableHandle,
        column: &str,
        select: bool,
    ) -> Result<ColumnHandle, BackendError> {
        let info = table.column(column).ok_or_else(|| BackendError::ColumnNotFound {
            table: table.table.to_string(),
            column: column.to_string(),
        })?;
        let dialect = self.dialect();
        let quoted = dialect.quote_ident(&dialect.normalize_ident(&info.name));
        let expr = if select {
            format!("{} AS {}", quoted, dialect.quote_ident(column))
        } else {
            quoted
        };
        Ok(ColumnHandle {
            table: table.table.clone(),
            name: info.name.clone(),
            expr,
        })
    }

    /// Companion or data table of a model
    fn get_model_table(&self, model: &str, kind: &TableType) -> Result<TableHandle, BackendError> {
        self.get_table(&TableName::for_model(model, kind))
    }

    fn ddl(&self) -> Option<&dyn SqlDdl> {
        None
    }
}

/// DDL hooks of relational backends
pub trait SqlDdl {
    fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>, BackendError>;

    fn table_exists(&self, table: &TableName) -> Result<bool, BackendError>;

    fn list_schemas(&self) -> Result<Vec<String>, BackendError>;

    fn foreign_keys(&self, table: &TableName) -> Result<Vec<ForeignKey>, BackendError>;

    /// Column lists of unique indexes, in index order
    fn unique_indexes(&self, table: &TableName) -> Result<Vec<Vec<String>>, BackendError>;

    fn create_schema(&self, schema: &str) -> Result<(), BackendError>;

    /// `(_id, redirect)` companion of a model; returns whether it was created
    fn create_redirect_table(&self, model: &str) -> Result<bool, BackendError>;

    fn create_changelog_table(&self, model: &str) -> Result<bool, BackendError>;

    /// Rename or move a table, across schemas if needed
    fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), BackendError>;

    fn add_column(&self, table: &TableName, column: &str, dtype: DataType) -> Result<(), BackendError>;

    fn apply_migration(&self, migration: &SchemaMigration) -> Result<(), BackendError>;

    /// Where a model table lives: under its dataset schema once that schema
    /// exists, unqualified otherwise
    fn locate_model_table(&self, model: &str, kind: &TableType) -> Result<TableName, BackendError> {
        let table = TableName::for_model(model, kind);
        let qualified = table.split_dataset();
        match &qualified.schema {
            Some(schema) if self.list_schemas()?.contains(schema) => Ok(qualified),
            _ => Ok(table),
        }
    }
}

/// Open a backend from its configuration
pub fn load_backend(
    name: &str,
    config: &BackendConfig,
    dialects: &DialectRegistry,
) -> Result<Arc<dyn Backend>, BackendError> {
    if !config.kind.starts_with("sql") {
        return Err(BackendError::UnknownBackendType(config.kind.clone()));
    }
    let dsn = config.resolved_dsn();
    let dialect = dialects.for_backend(&config.kind, &dsn)?;
    if dialect.name() != "sqlite" {
        return Err(BackendError::UnsupportedDsn(dsn));
    }
    info!(backend = name, kind = %config.kind, "loading backend");
    Ok(Arc::new(SqliteBackend::load(name, config, dialect)?))
}

/// Every configured backend, by name
#[derive(Clone, Default)]
pub struct Backends {
    backends: BTreeMap<String, Arc<dyn Backend>>,
    default: String,
}

impl Backends {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            backends: BTreeMap::new(),
            default: default.into(),
        }
    }

    pub fn load(config: &Config, dialects: &DialectRegistry) -> Result<Self, BackendError> {
        let mut backends = Self::new(config.default_backend.clone());
        for (name, backend) in &config.backends {
            backends.insert(load_backend(name, backend, dialects)?);
        }
        Ok(backends)
    }

    pub fn insert(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::BackendNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Backend>)> {
        self.backends.iter().map(|(name, backend)| (name.as_str(), backend))
    }

    /// Backend named by the model's resource, or the default one
    pub fn for_model(&self, manifest: &Manifest, model: ModelId) -> Result<Arc<dyn Backend>, BackendError> {
        let name = manifest
            .model(model)
            .resource
            .map(|resource| manifest.resource(resource).backend.as_str())
            .filter(|backend| !backend.is_empty())
            .unwrap_or(self.default.as_str());
        self.get(name)
    }

    /// Run `prepare` on every backend
    pub fn prepare(&self, manifest: &Manifest) -> Result<(), BackendError> {
        for backend in self.backends.values() {
            backend.prepare(manifest)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}
