use spinta_backends::TableName;
use spinta_core::Context;
use tracing::{info, warn};

use crate::error::ScriptError;
use crate::resources::{backends, ddl};
use crate::script::{Script, ScriptArgs, ScriptTag, ScriptTarget, ScriptType};

/// Moves tables named `dataset/path/Model[/:kind]` into a `dataset/path`
/// schema as `Model[/:kind]`
pub struct PostgresqlSchemas;

impl PostgresqlSchemas {
    /// `(backend, from, to)` for every table still carrying its dataset
    fn pending(ctx: &Context) -> Result<Vec<(String, TableName, TableName)>, ScriptError> {
        let backends = backends(ctx)?;
        let mut pending = Vec::new();
        for (name, backend) in backends.iter() {
            let Some(ddl) = backend.ddl() else {
                continue;
            };
            for table in ddl.list_tables(None)? {
                if table.starts_with('_') {
                    continue;
                }
                let from = TableName::new(table);
                let to = from.split_dataset();
                if to.schema.is_some() {
                    pending.push((name.to_string(), from, to));
                }
            }
        }
        Ok(pending)
    }
}

impl Script for PostgresqlSchemas {
    fn name(&self) -> &'static str {
        "postgresql_schemas"
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
        Ok(!Self::pending(ctx)?.is_empty())
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        let backends = backends(ctx)?;
        for (name, from, to) in Self::pending(ctx)? {
            let backend = backends.get(&name)?;
            let ddl = ddl(backend.as_ref())?;
            if let Some(schema) = &to.schema {
                ddl.create_schema(schema)?;
            }
            if ddl.table_exists(&to)? {
                warn!(backend = %name, from = %from, to = %to, "target table exists, skipping");
                continue;
            }
            ddl.rename_table(&from, &to)?;
            info!(backend = %name, from = %from, to = %to, "table moved");
        }
        Ok(())
    }
}
