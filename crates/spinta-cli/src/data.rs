//! Commands reading a database: `inspect`, `pii detect` and `getall`

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use spinta_backends::{
    apply_pii, detect_pii, getall, inspect, load_backend, parse_sort, Backend, DialectRegistry,
    GetAllOptions, InspectOptions,
};
use spinta_core::{BackendConfig, Config};
use spinta_keymap::SqlKeyMap;
use spinta_manifest::{
    datasets_to_tabular, used_columns, write_tabular, LoadOptions, RenderOptions, TabularRow,
};
use tracing::info;

use crate::cli::{GetallArgs, InspectArgs, PiiArgs};
use crate::manifest::load;

/// Plain paths are read as SQLite files
pub fn normalize_dsn(dsn: &str) -> String {
    if dsn.contains("://") {
        dsn.to_string()
    } else {
        format!("sqlite:///{}", dsn)
    }
}

pub fn open_backend(dsn: &str) -> anyhow::Result<Arc<dyn Backend>> {
    let config = BackendConfig::new("sql", normalize_dsn(dsn));
    Ok(load_backend("default", &config, &DialectRegistry::with_defaults())?)
}

fn write_rows(rows: &[TabularRow], output: Option<&Path>, out: &mut dyn Write) -> anyhow::Result<()> {
    let columns = used_columns(rows);
    match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            write_tabular(file, rows, &columns)?;
            info!(path = %path.display(), rows = rows.len(), "manifest written");
        }
        None => write_tabular(out, rows, &columns)?,
    }
    Ok(())
}

pub fn inspect_command(args: &InspectArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let dsn = normalize_dsn(&args.dsn);
    let backend = open_backend(&dsn)?;
    let options = InspectOptions {
        dataset: args.dataset.clone(),
        resource: args.resource.clone(),
        dsn,
        require_pk: args.require_pk,
    };
    let rows = inspect(backend.as_ref(), &options)?;
    write_rows(&rows, args.output.as_deref(), out)
}

pub fn pii_detect(args: &PiiArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut manifest = load(&[args.manifest.clone()], &LoadOptions::default(), false)?;
    let backend = open_backend(&args.dsn)?;
    let found = detect_pii(&manifest, backend.as_ref(), args.limit)?;
    info!(properties = found.len(), "personal data detected");
    apply_pii(&mut manifest, &found);
    let rows = datasets_to_tabular(&manifest, &RenderOptions::default());
    write_rows(&rows, args.output.as_deref(), out)
}

/// One JSON object per line
pub fn getall_command(config: &Config, args: &GetallArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let manifest = load(&[args.manifest.clone()], &LoadOptions::default(), false)?;
    let model = manifest.get_model(&args.model)?;
    let backend = open_backend(&args.data)?;
    let keymap = SqlKeyMap::open(&config.keymap, false)?;

    let options = GetAllOptions {
        filter: args.filter.as_deref().map(spinta_spyna::parse).transpose()?,
        sort: match &args.sort {
            Some(sort) => parse_sort(sort)?,
            None => Vec::new(),
        },
        limit: args.limit,
        offset: args.offset,
    };
    for row in getall(backend.as_ref(), &manifest, model, &keymap, &options)? {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dsn() {
        assert_eq!(normalize_dsn("data/db.sqlite"), "sqlite:///data/db.sqlite");
        assert_eq!(normalize_dsn("sqlite://"), "sqlite://");
    }
}
