use std::io;
use std::process::ExitCode;

use clap::Parser;
use spinta_cli::{diagnostics, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("spinta=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spinta=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let code = match spinta_cli::run(cli, &mut out) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", diagnostics::describe(&e));
            diagnostics::exit_code(&e)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
