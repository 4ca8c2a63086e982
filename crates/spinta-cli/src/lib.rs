//! The `spinta` command line
//!
//! Commands are plain functions writing to a caller supplied stream, so
//! the binary and the tests drive them the same way.

use std::io::Write;
use std::path::Path;

use spinta_core::{Config, CoreError};
use spinta_scripts::ScriptType;

pub mod cli;
pub mod data;
pub mod diagnostics;
pub mod manifest;
pub mod scripts;

pub use cli::{Cli, Command};

/// Exit status for a run whose scripts reported failures
pub const EXIT_SCRIPT_FAILED: i32 = 2;

/// Config from `path`, or the defaults, then the `SPINTA_*` environment
pub fn load_config(path: Option<&Path>) -> Result<Config, CoreError> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env();
    Ok(config)
}

/// Run one command; returns the process exit status
pub fn run(cli: Cli, out: &mut dyn Write) -> anyhow::Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Init { path } => manifest::init(&path)?,
        Command::Copy(args) => manifest::copy(&args, out)?,
        Command::Check { manifests } => manifest::check_manifests(&manifests, out)?,
        Command::Show { manifests } => manifest::show(&manifests, out)?,
        Command::Inspect(args) => data::inspect_command(&args, out)?,
        Command::Pii {
            command: cli::PiiCommand::Detect(args),
        } => data::pii_detect(&args, out)?,
        Command::Getall(args) => data::getall_command(&config, &args, out)?,
        Command::Upgrade(args) => {
            if !scripts::run_command(config, ScriptType::Upgrade, &args, out)? {
                return Ok(EXIT_SCRIPT_FAILED);
            }
        }
        Command::Admin(args) => {
            if !scripts::run_command(config, ScriptType::Admin, &args, out)? {
                return Ok(EXIT_SCRIPT_FAILED);
            }
        }
    }
    Ok(0)
}
