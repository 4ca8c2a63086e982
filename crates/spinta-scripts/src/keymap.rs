//! Keymap schema migrations exposed as upgrade scripts

use spinta_core::Context;
use spinta_keymap::schema::{MIGRATION_INITIAL, MIGRATION_REDIRECT};
use tracing::info;

use crate::error::ScriptError;
use crate::resources::keymap;
use crate::script::{Requirement, Script, ScriptArgs, ScriptTag, ScriptTarget, ScriptType};

const PROGRESS_EVERY: usize = 10_000;

fn is_missing(ctx: &Context, migration: &str) -> Result<bool, ScriptError> {
    Ok(keymap(ctx)?
        .missing_migrations()?
        .iter()
        .any(|m| m == migration))
}

pub struct SqlKeymapInitial;

impl Script for SqlKeymapInitial {
    fn name(&self) -> &'static str {
        MIGRATION_INITIAL
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Upgrade
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        vec![ScriptTarget::SqlalchemyKeymap]
    }

    fn tags(&self) -> Vec<ScriptTag> {
        vec![ScriptTag::DbMigration]
    }

    fn check(&self, ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
        is_missing(ctx, MIGRATION_INITIAL)
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        keymap(ctx)?.migrate_initial()?;
        Ok(())
    }
}

pub struct SqlKeymapRedirect;

impl Script for SqlKeymapRedirect {
    fn name(&self) -> &'static str {
        MIGRATION_REDIRECT
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Upgrade
    }

    fn required(&self) -> Vec<Requirement> {
        vec![Requirement::Name(MIGRATION_INITIAL)]
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        vec![ScriptTarget::SqlalchemyKeymap]
    }

    fn tags(&self) -> Vec<ScriptTag> {
        vec![ScriptTag::DbMigration]
    }

    fn check(&self, ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
        is_missing(ctx, MIGRATION_REDIRECT)
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        keymap(ctx)?.migrate_redirect(|table, rows| {
            if rows % PROGRESS_EVERY == 0 {
                info!(table, rows, "keymap rows copied");
            }
        })?;
        Ok(())
    }
}
