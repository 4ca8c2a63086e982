//! Per-model page sizes derived from a byte budget

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use spinta_core::Context;
use spinta_manifest::{DataType, Manifest};
use tracing::info;

use crate::error::ScriptError;
use crate::resources::manifest;
use crate::script::{Script, ScriptArgs, ScriptType};

/// Rough stored width of one value
pub fn dtype_bytes(kind: DataType) -> u64 {
    match kind {
        DataType::Integer | DataType::Number => 8,
        DataType::Boolean => 1,
        DataType::Date => 4,
        DataType::Datetime | DataType::Time => 8,
        DataType::Uuid | DataType::Ref => 16,
        DataType::Geometry => 256,
        DataType::Binary | DataType::File | DataType::Image => 1024,
        _ => 64,
    }
}

/// `model -> rows per page` for every model not starting with `_`
pub fn model_limits(manifest: &Manifest, budget: u64) -> BTreeMap<String, u64> {
    let mut limits = BTreeMap::new();
    for (_, model) in manifest.get_models() {
        if model.name.starts_with('_') || model.basename().starts_with('_') {
            continue;
        }
        let row_bytes: u64 = model
            .properties
            .iter()
            .map(|&id| manifest.property(id))
            .filter(|prop| !prop.synthetic && prop.dtype.kind != DataType::Backref)
            .map(|prop| dtype_bytes(prop.dtype.kind))
            .sum();
        let limit = budget.checked_div(row_bytes).unwrap_or(budget).max(1);
        limits.insert(model.name.clone(), limit);
    }
    limits
}

pub struct ModelLimit;

impl ModelLimit {
    fn path(ctx: &Context, args: &ScriptArgs) -> PathBuf {
        args.input
            .clone()
            .unwrap_or_else(|| ctx.config().limits_path())
    }

    fn render(ctx: &Context) -> Result<String, ScriptError> {
        let manifest = manifest(ctx)?;
        let limits = model_limits(&manifest, ctx.config().default_limit_bytes);
        Ok(serde_yaml::to_string(&limits)?)
    }
}

impl Script for ModelLimit {
    fn name(&self) -> &'static str {
        "model_limit"
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Admin
    }

    fn check(&self, ctx: &Context, args: &ScriptArgs) -> Result<bool, ScriptError> {
        let path = Self::path(ctx, args);
        match fs::read_to_string(&path) {
            Ok(existing) => Ok(existing != Self::render(ctx)?),
            Err(_) => Ok(true),
        }
    }

    fn run(&self, ctx: &Context, args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        let path = Self::path(ctx, args);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(ScriptError::io(parent))?;
        }
        fs::write(&path, Self::render(ctx)?).map_err(ScriptError::io(&path))?;
        info!(path = %path.display(), "model limits written");
        Ok(())
    }
}
