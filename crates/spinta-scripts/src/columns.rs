//! `new_columns`: widen existing model tables with columns for properties
//! added to the manifest after the table was created

use std::sync::Arc;

use spinta_backends::{Backend, TableName, TableType};
use spinta_core::Context;
use spinta_manifest::DataType;
use tracing::info;

use crate::error::ScriptError;
use crate::resources::{backends, ddl, ddl_models, manifest};
use crate::script::{Script, ScriptArgs, ScriptTag, ScriptTarget, ScriptType};

struct MissingColumn {
    backend: Arc<dyn Backend>,
    table: TableName,
    column: String,
    dtype: DataType,
}

/// Stored in companion tables or not stored at all
fn has_column(dtype: DataType) -> bool {
    !matches!(dtype, DataType::Backref | DataType::Array | DataType::Object)
}

pub struct NewColumns;

impl NewColumns {
    fn missing(ctx: &Context) -> Result<Vec<MissingColumn>, ScriptError> {
        let manifest = manifest(ctx)?;
        let backends = backends(ctx)?;
        let mut missing = Vec::new();
        for (id, backend) in ddl_models(&manifest, &backends)? {
            let model = manifest.model(id);
            let table = ddl(backend.as_ref())?.locate_model_table(&model.name, &TableType::Data)?;
            // tables are created on first write, nothing to widen yet
            if !ddl(backend.as_ref())?.table_exists(&table)? {
                continue;
            }
            let handle = backend.get_table(&table)?;
            for prop in model.properties.iter().map(|&p| manifest.property(p)) {
                if prop.synthetic || !has_column(prop.dtype.kind) || handle.column(&prop.name).is_some() {
                    continue;
                }
                missing.push(MissingColumn {
                    backend: Arc::clone(&backend),
                    table: table.clone(),
                    column: prop.name.clone(),
                    dtype: prop.dtype.kind,
                });
            }
        }
        Ok(missing)
    }
}

impl Script for NewColumns {
    fn name(&self) -> &'static str {
        "new_columns"
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Upgrade
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        vec![ScriptTarget::Backend]
    }

    fn tags(&self) -> Vec<ScriptTag> {
        vec![ScriptTag::Migration]
    }

    fn check(&self, ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
        Ok(!Self::missing(ctx)?.is_empty())
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        for missing in Self::missing(ctx)? {
            ddl(missing.backend.as_ref())?.add_column(&missing.table, &missing.column, missing.dtype)?;
            info!(table = %missing.table, column = %missing.column, "column added");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companion_types_have_no_column() {
        assert!(has_column(DataType::Ref));
        assert!(has_column(DataType::Geometry));
        assert!(!has_column(DataType::Backref));
        assert!(!has_column(DataType::Array));
    }
}
