//! Upgrade and admin scripts
//!
//! Scripts are registered by type and name, ordered by their declared
//! predecessors and run only when `check` reports work to do. Statuses are
//! cached per process so dependents see what their predecessors did.

use std::sync::Arc;

mod clients;
mod columns;
mod error;
mod keymap;
mod limits;
mod redirect;
mod registry;
mod resources;
mod runner;
mod schemas;
mod script;

pub use clients::{Client, ClientStore, ClientsScript};
pub use columns::NewColumns;
pub use error::ScriptError;
pub use keymap::{SqlKeymapInitial, SqlKeymapRedirect};
pub use limits::{dtype_bytes, model_limits, ModelLimit};
pub use redirect::{ChangelogScript, DeduplicateScript, RedirectScript};
pub use registry::ScriptRegistry;
pub use runner::{
    format_report, run_scripts, sort_scripts, RunOptions, ScriptReport, StatusCache,
};
pub use schemas::PostgresqlSchemas;
pub use script::{
    Requirement, Script, ScriptArgs, ScriptKey, ScriptStatus, ScriptTag, ScriptTarget, ScriptType,
};

/// Register every built-in script
pub fn init(registry: &mut ScriptRegistry) -> Result<(), ScriptError> {
    registry.register(Arc::new(ClientsScript))?;
    registry.register(Arc::new(RedirectScript))?;
    registry.register(Arc::new(DeduplicateScript))?;
    registry.register(Arc::new(SqlKeymapInitial))?;
    registry.register(Arc::new(SqlKeymapRedirect))?;
    registry.register(Arc::new(PostgresqlSchemas))?;
    registry.register(Arc::new(NewColumns))?;
    registry.register(Arc::new(ChangelogScript))?;
    registry.register(Arc::new(ModelLimit))?;
    Ok(())
}
