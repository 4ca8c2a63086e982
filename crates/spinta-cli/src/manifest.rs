//! `init`, `copy`, `check` and `show`

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _};
use spinta_core::Access;
use spinta_manifest::{
    check, datasets_to_tabular, format_names, link, load_nodes, read_manifest_file, used_columns,
    write_ascii, write_tabular, Column, LoadOptions, Manifest, ManifestError, OrderBy,
    RenderOptions, TabularRow,
};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cli::CopyArgs;
use crate::diagnostics;

/// Header written by `init`
pub const INIT_COLUMNS: [Column; 15] = [
    Column::Id,
    Column::Dataset,
    Column::Resource,
    Column::Base,
    Column::Model,
    Column::Property,
    Column::Type,
    Column::Ref,
    Column::Source,
    Column::Prepare,
    Column::Level,
    Column::Access,
    Column::Uri,
    Column::Title,
    Column::Description,
];

const MANIFEST_EXTENSIONS: [&str; 2] = ["csv", "txt"];

/// Files named on the command line, with directories expanded to the
/// manifests they contain
pub fn manifest_paths(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            paths.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
            })
            .collect();
        found.sort();
        debug!(dir = %input.display(), files = found.len(), "manifest directory expanded");
        paths.extend(found);
    }
    paths
}

/// Read, load and link manifests; errors carrying a row are shown against
/// the file they came from
pub fn load(paths: &[PathBuf], options: &LoadOptions, rename: bool) -> anyhow::Result<Manifest> {
    let mut manifest = Manifest::new();
    for path in paths {
        let mut schemas = read_manifest_file(path).map_err(|e| diagnose(path, e))?;
        if rename {
            format_names(&mut schemas);
        }
        load_nodes(&mut manifest, schemas, options).map_err(|e| diagnose(path, e))?;
    }
    link(&mut manifest)?;
    Ok(manifest)
}

fn diagnose(path: &Path, error: ManifestError) -> anyhow::Error {
    diagnostics::emit(path, &error);
    anyhow::Error::new(error).context(format!("in {}", path.display()))
}

pub fn init(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_tabular(file, &[], &INIT_COLUMNS)?;
    info!(path = %path.display(), "manifest created");
    Ok(())
}

fn parse_columns(spec: &str) -> anyhow::Result<Vec<Column>> {
    spec.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| Column::from_header(name).ok_or_else(|| anyhow!("unknown column '{}'", name)))
        .collect()
}

/// Rows and columns `copy` writes
pub fn copy_rows(args: &CopyArgs) -> anyhow::Result<(Vec<TabularRow>, Vec<Column>)> {
    let paths = manifest_paths(&args.manifests);
    let options = LoadOptions {
        rename_duplicates: args.rename_duplicates,
    };
    let manifest = load(&paths, &options, args.format_names)?;

    let render = RenderOptions {
        external: !args.no_source,
        access: args.access.as_deref().map(str::parse::<Access>).transpose()?,
        order_by: args
            .order_by
            .as_deref()
            .map(str::parse::<OrderBy>)
            .transpose()
            .map_err(|e| anyhow!(e))?,
        ..RenderOptions::default()
    };
    let rows = datasets_to_tabular(&manifest, &render);
    let columns = match &args.columns {
        Some(spec) => parse_columns(spec)?,
        None => used_columns(&rows),
    };
    Ok((rows, columns))
}

pub fn copy(args: &CopyArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let (rows, columns) = copy_rows(args)?;
    match &args.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            write_tabular(file, &rows, &columns)?;
            info!(path = %path.display(), rows = rows.len(), "manifest written");
        }
        None => write_tabular(out, &rows, &columns)?,
    }
    Ok(())
}

pub fn check_manifests(manifests: &[PathBuf], out: &mut dyn Write) -> anyhow::Result<()> {
    let paths = manifest_paths(manifests);
    let manifest = load(&paths, &LoadOptions::default(), false)?;
    check(&manifest)?;
    writeln!(out, "OK")?;
    Ok(())
}

pub fn show(manifests: &[PathBuf], out: &mut dyn Write) -> anyhow::Result<()> {
    let paths = manifest_paths(manifests);
    let manifest = load(&paths, &LoadOptions::default(), false)?;
    let rows = datasets_to_tabular(&manifest, &RenderOptions::default());
    write!(out, "{}", write_ascii(&rows, &used_columns(&rows)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_columns() {
        assert_eq!(
            parse_columns("d, m,property,type").unwrap(),
            vec![Column::Dataset, Column::Model, Column::Property, Column::Type]
        );
        assert!(parse_columns("model,colour").is_err());
    }
}
