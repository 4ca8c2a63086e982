//! Typed access to the context resources scripts work on

use std::sync::Arc;

use spinta_backends::{Backend, Backends, SqlDdl};
use spinta_core::{Context, BACKENDS, KEYMAP, MANIFEST};
use spinta_keymap::SqlKeyMap;
use spinta_manifest::{Manifest, ModelId};
use tracing::warn;

use crate::error::ScriptError;

pub fn manifest(ctx: &Context) -> Result<Arc<Manifest>, ScriptError> {
    Ok(ctx.get::<Manifest>(MANIFEST)?)
}

pub fn backends(ctx: &Context) -> Result<Arc<Backends>, ScriptError> {
    Ok(ctx.get::<Backends>(BACKENDS)?)
}

pub fn keymap(ctx: &Context) -> Result<Arc<SqlKeyMap>, ScriptError> {
    Ok(ctx.get::<SqlKeyMap>(KEYMAP)?)
}

/// Models stored in a backend with DDL hooks, skipping `_` models
pub fn ddl_models(
    manifest: &Manifest,
    backends: &Backends,
) -> Result<Vec<(ModelId, Arc<dyn Backend>)>, ScriptError> {
    let mut models = Vec::new();
    for (id, model) in manifest.get_models() {
        if model.name.starts_with('_') || model.basename().starts_with('_') {
            continue;
        }
        let backend = backends.for_model(manifest, id)?;
        if backend.ddl().is_none() {
            warn!(model = %model.name, backend = backend.name(), "backend has no DDL support, skipping");
            continue;
        }
        models.push((id, backend));
    }
    Ok(models)
}

/// DDL hooks of a backend returned by [`ddl_models`]
pub fn ddl(backend: &dyn Backend) -> Result<&dyn SqlDdl, ScriptError> {
    backend.ddl().ok_or_else(|| {
        ScriptError::Backend(spinta_backends::BackendError::UnknownBackendType(
            backend.kind().to_string(),
        ))
    })
}
