use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "spinta")]
#[command(about = "Manage data manifests, keymaps and backend storage", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SPINTA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write an empty tabular manifest
    Init {
        path: PathBuf,
    },

    /// Filter and transform manifests into one
    Copy(CopyArgs),

    /// Validate manifest structure
    Check {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },

    /// Print a manifest as an ASCII table
    Show {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },

    /// Draft a manifest from a database
    Inspect(InspectArgs),

    /// Personal data detection
    Pii {
        #[command(subcommand)]
        command: PiiCommand,
    },

    /// Run upgrade scripts
    Upgrade(ScriptArgs),

    /// Run admin scripts
    Admin(ScriptArgs),

    /// Read rows of a model through a manifest
    Getall(GetallArgs),
}

#[derive(Args, Debug, Default)]
pub struct CopyArgs {
    /// Input manifests, or directories of them
    #[arg(required = true)]
    pub manifests: Vec<PathBuf>,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Drop `source`, `source.type` and `prepare`
    #[arg(long, alias = "no-external")]
    pub no_source: bool,

    /// Keep only nodes with at least this access
    #[arg(long)]
    pub access: Option<String>,

    /// Rewrite names to `UpperCamelCase` models and `snake_case` properties
    #[arg(long)]
    pub format_names: bool,

    #[arg(long)]
    pub order_by: Option<String>,

    /// Suffix repeated names instead of failing
    #[arg(long)]
    pub rename_duplicates: bool,

    /// Comma separated output columns
    #[arg(short = 'c', long)]
    pub columns: Option<String>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long)]
    pub dsn: String,

    #[arg(long, default_value = "dataset")]
    pub dataset: String,

    #[arg(long, default_value = "resource1")]
    pub resource: String,

    /// Fail on tables without a primary key or unique index
    #[arg(long)]
    pub require_pk: bool,

    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum PiiCommand {
    /// Tag properties holding personal data
    Detect(PiiArgs),
}

#[derive(Args, Debug)]
pub struct PiiArgs {
    pub manifest: PathBuf,

    #[arg(long)]
    pub dsn: String,

    /// Rows sampled per model
    #[arg(long, default_value_t = 1000)]
    pub limit: usize,

    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct ScriptArgs {
    /// Scripts to run; every script of the type when omitted
    pub scripts: Vec<String>,

    /// Run scripts even when their check passes
    #[arg(short, long)]
    pub force: bool,

    /// Allow scripts to overwrite existing data
    #[arg(short, long)]
    pub destructive: bool,

    /// Only report script statuses
    #[arg(long)]
    pub check: bool,

    /// Alternative input location for scripts reading files
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct GetallArgs {
    pub manifest: PathBuf,

    /// DSN of the database holding the data
    pub data: String,

    /// Absolute model name
    pub model: String,

    /// Spyna filter, e.g. `code = 'lt'`
    #[arg(long)]
    pub filter: Option<String>,

    /// Sort keys, e.g. `-name,code`
    #[arg(long)]
    pub sort: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub offset: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_copy_accepts_no_external_alias() {
        let cli = Cli::parse_from(["spinta", "copy", "--no-external", "--access", "open", "a.csv"]);
        let Command::Copy(args) = cli.command else {
            panic!("expected copy");
        };
        assert!(args.no_source);
        assert_eq!(args.access.as_deref(), Some("open"));
    }

    #[test]
    fn test_upgrade_flags() {
        let cli = Cli::parse_from(["spinta", "upgrade", "-f", "--check", "clients", "redirect"]);
        let Command::Upgrade(args) = cli.command else {
            panic!("expected upgrade");
        };
        assert!(args.force && args.check && !args.destructive);
        assert_eq!(args.scripts, vec!["clients", "redirect"]);
    }
}
