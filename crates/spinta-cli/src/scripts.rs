//! `upgrade` and `admin`

use std::io::Write;

use spinta_backends::{Backends, DialectRegistry};
use spinta_core::{Config, Context, CoreError, BACKENDS, KEYMAP, MANIFEST};
use spinta_keymap::SqlKeyMap;
use spinta_manifest::{load_manifest_files, LoadOptions, Manifest};
use spinta_scripts::{
    format_report, run_scripts, RunOptions, ScriptRegistry, ScriptType, StatusCache,
};
use tracing::warn;

use crate::cli::ScriptArgs;

fn init_error<E: std::fmt::Display>(name: &'static str) -> impl FnOnce(E) -> CoreError {
    move |e| CoreError::ResourceInit {
        name: name.to_string(),
        message: e.to_string(),
    }
}

/// Context with the manifest, backends and keymap attached lazily, so a
/// script only opens what it touches
pub fn script_context(config: Config, upgrade_mode: bool) -> Context {
    let ctx = Context::new(config.clone()).with_upgrade_mode(upgrade_mode);

    let manifest = config.manifest.clone();
    ctx.attach(MANIFEST, move || match manifest {
        Some(path) => load_manifest_files(&[path], &LoadOptions::default()).map_err(init_error(MANIFEST)),
        None => Ok(Manifest::new()),
    });

    let backends = config.clone();
    ctx.attach(BACKENDS, move || {
        Backends::load(&backends, &DialectRegistry::with_defaults()).map_err(init_error(BACKENDS))
    });

    let keymap = config.keymap;
    ctx.attach(KEYMAP, move || {
        SqlKeyMap::open(&keymap, upgrade_mode).map_err(init_error(KEYMAP))
    });
    ctx
}

/// Prints one status line per script; `false` when any script failed
pub fn run_command(
    config: Config,
    script_type: ScriptType,
    args: &ScriptArgs,
    out: &mut dyn Write,
) -> anyhow::Result<bool> {
    let ctx = script_context(config, script_type == ScriptType::Upgrade);
    let registry = ScriptRegistry::with_defaults()?;
    let options = RunOptions {
        force: args.force,
        destructive: args.destructive,
        check_only: args.check,
        args: spinta_scripts::ScriptArgs {
            input: args.input.clone(),
        },
    };
    let mut cache = StatusCache::default();
    let reports = run_scripts(&ctx, &registry, script_type, &args.scripts, &options, &mut cache)?;
    if !reports.is_empty() {
        writeln!(out, "{}", format_report(&reports))?;
    }

    let failed = reports.iter().filter(|r| r.failed()).count();
    if failed > 0 {
        warn!(failed, "scripts failed");
    }
    Ok(failed == 0)
}
