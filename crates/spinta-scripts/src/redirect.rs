//! Redirect tables and the fixes that depend on them
//!
//! `redirect` gives every model a `/:redirect` companion table,
//! `deduplicate` collapses surrogate keys that the pre-redirect keymap
//! issued twice for one natural key, and `changelog` repoints changelog
//! rows at the keys that survived.

use serde_json::Value;
use spinta_backends::{Backend, Dialect, TableName, TableType};
use spinta_core::Context;
use tracing::{debug, info};

use crate::error::ScriptError;
use crate::resources::{backends, ddl, ddl_models, keymap, manifest};
use crate::script::{Requirement, Script, ScriptArgs, ScriptTag, ScriptTarget, ScriptType};

/// Parameter marker, or an inline literal for dialects without binds
fn bind(dialect: &dyn Dialect, value: &str, params: &mut Vec<Value>) -> String {
    let value = Value::String(value.to_string());
    match dialect.placeholder(params.len() + 1) {
        Some(marker) => {
            params.push(value);
            marker
        }
        None => dialect.literal(&value),
    }
}

fn column(dialect: &dyn Dialect, table: &TableName, name: &str) -> String {
    format!("{}.{}", dialect.qualify(table), dialect.quote_ident(name))
}

pub struct RedirectScript;

impl RedirectScript {
    fn missing(ctx: &Context) -> Result<Vec<(String, std::sync::Arc<dyn Backend>)>, ScriptError> {
        let manifest = manifest(ctx)?;
        let backends = backends(ctx)?;
        let mut missing = Vec::new();
        for (id, backend) in ddl_models(&manifest, &backends)? {
            let name = &manifest.model(id).name;
            let ddl = ddl(backend.as_ref())?;
            let table = ddl.locate_model_table(name, &TableType::Redirect)?;
            if !ddl.table_exists(&table)? {
                missing.push((name.clone(), backend));
            }
        }
        Ok(missing)
    }
}

impl Script for RedirectScript {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Upgrade
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        vec![ScriptTarget::Backend]
    }

    fn tags(&self) -> Vec<ScriptTag> {
        vec![ScriptTag::Migration]
    }

    fn check(&self, ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
        Ok(!Self::missing(ctx)?.is_empty())
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        for (model, backend) in Self::missing(ctx)? {
            ddl(backend.as_ref())?.create_redirect_table(&model)?;
        }
        Ok(())
    }
}

pub struct DeduplicateScript;

impl DeduplicateScript {
    /// `(model, groups of keys sharing one value)` with duplicates
    fn duplicates(ctx: &Context) -> Result<Vec<(String, Vec<Vec<String>>)>, ScriptError> {
        let manifest = manifest(ctx)?;
        let keymap = keymap(ctx)?;
        let mut found = Vec::new();
        for (_, model) in manifest.get_models() {
            if model.name.starts_with('_') {
                continue;
            }
            let groups = keymap.duplicate_keys(&model.name)?;
            if !groups.is_empty() {
                found.push((model.name.clone(), groups));
            }
        }
        Ok(found)
    }
}

impl Script for DeduplicateScript {
    fn name(&self) -> &'static str {
        "deduplicate"
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Upgrade
    }

    fn required(&self) -> Vec<Requirement> {
        vec![Requirement::Name("redirect")]
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        vec![ScriptTarget::Backend]
    }

    fn tags(&self) -> Vec<ScriptTag> {
        vec![ScriptTag::BugFix]
    }

    fn check(&self, ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
        Ok(!Self::duplicates(ctx)?.is_empty())
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        let manifest = manifest(ctx)?;
        let backends = backends(ctx)?;
        let keymap = keymap(ctx)?;

        for (model, groups) in Self::duplicates(ctx)? {
            let id = manifest.get_model(&model)?;
            let backend = backends.for_model(&manifest, id)?;
            let dialect = backend.dialect();
            let table = ddl(backend.as_ref())?.locate_model_table(&model, &TableType::Redirect)?;

            let moves: Vec<(&String, &String)> = groups
                .iter()
                .filter_map(|keys| keys.split_first())
                .flat_map(|(kept, rest)| rest.iter().map(move |key| (key, kept)))
                .collect();

            // The backend rows go first: a failure here leaves the keymap
            // untouched, so the next run still sees the duplicates.
            let mut tx = backend.begin()?;
            for (key, kept) in &moves {
                let mut params = Vec::new();
                let delete = format!(
                    "DELETE FROM {} WHERE {} = {}",
                    dialect.qualify(&table),
                    dialect.quote_ident("_id"),
                    bind(dialect.as_ref(), key, &mut params)
                );
                tx.execute(&delete, &params)?;

                let mut params = Vec::new();
                let insert = format!(
                    "INSERT INTO {} ({}, {}) VALUES ({}, {})",
                    dialect.qualify(&table),
                    dialect.quote_ident("_id"),
                    dialect.quote_ident("redirect"),
                    bind(dialect.as_ref(), key, &mut params),
                    bind(dialect.as_ref(), kept, &mut params)
                );
                tx.execute(&insert, &params)?;
            }
            tx.commit()?;

            for (key, kept) in &moves {
                keymap.redirect_key(&model, key, kept)?;
                debug!(model = %model, from = %key, to = %kept, "duplicate key redirected");
            }
            let redirected = moves.len();
            info!(model = %model, redirected, "duplicates resolved");
        }
        Ok(())
    }
}

pub struct ChangelogScript;

struct ChangelogState {
    model: String,
    backend: std::sync::Arc<dyn Backend>,
    missing: bool,
    orphaned: i64,
}

impl ChangelogScript {
    fn inspect(ctx: &Context) -> Result<Vec<ChangelogState>, ScriptError> {
        let manifest = manifest(ctx)?;
        let backends = backends(ctx)?;
        let mut states = Vec::new();
        for (id, backend) in ddl_models(&manifest, &backends)? {
            let model = manifest.model(id).name.clone();
            let ddl = ddl(backend.as_ref())?;
            let changelog = ddl.locate_model_table(&model, &TableType::Changelog)?;
            let redirect = ddl.locate_model_table(&model, &TableType::Redirect)?;

            let missing = !ddl.table_exists(&changelog)?;
            let orphaned = if !missing && ddl.table_exists(&redirect)? {
                let dialect = backend.dialect();
                let sql = format!(
                    "SELECT COUNT(*) AS {} FROM {} WHERE {} IN (SELECT {} FROM {})",
                    dialect.quote_ident("n"),
                    dialect.qualify(&changelog),
                    column(dialect.as_ref(), &changelog, "_rid"),
                    column(dialect.as_ref(), &redirect, "_id"),
                    dialect.qualify(&redirect)
                );
                let mut tx = backend.begin()?;
                let rows = tx.query(&sql, &[])?;
                tx.commit()?;
                rows.first()
                    .and_then(|row| row.get("n"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0)
            } else {
                0
            };
            if missing || orphaned > 0 {
                states.push(ChangelogState {
                    model,
                    backend,
                    missing,
                    orphaned,
                });
            }
        }
        Ok(states)
    }
}

impl Script for ChangelogScript {
    fn name(&self) -> &'static str {
        "changelog"
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Admin
    }

    fn required(&self) -> Vec<Requirement> {
        vec![Requirement::Typed(ScriptType::Upgrade, "deduplicate")]
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        vec![ScriptTarget::Backend]
    }

    fn check(&self, ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
        Ok(!Self::inspect(ctx)?.is_empty())
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, _destructive: bool) -> Result<(), ScriptError> {
        for state in Self::inspect(ctx)? {
            let backend = state.backend.as_ref();
            let ddl = ddl(backend)?;
            if state.missing {
                ddl.create_changelog_table(&state.model)?;
                continue;
            }

            let dialect = backend.dialect();
            let changelog = ddl.locate_model_table(&state.model, &TableType::Changelog)?;
            let redirect = ddl.locate_model_table(&state.model, &TableType::Redirect)?;
            let rid = column(dialect.as_ref(), &changelog, "_rid");
            let sql = format!(
                "UPDATE {changelog_table} SET {rid_name} = \
                 (SELECT {target} FROM {redirect_table} WHERE {redirect_id} = {rid}) \
                 WHERE {rid} IN (SELECT {redirect_id} FROM {redirect_table})",
                changelog_table = dialect.qualify(&changelog),
                rid_name = dialect.quote_ident("_rid"),
                target = column(dialect.as_ref(), &redirect, "redirect"),
                redirect_table = dialect.qualify(&redirect),
                redirect_id = column(dialect.as_ref(), &redirect, "_id"),
                rid = rid,
            );
            let mut tx = backend.begin()?;
            let updated = tx.execute(&sql, &[])?;
            tx.commit()?;
            info!(model = %state.model, orphaned = state.orphaned, updated, "changelog rows repointed");
        }
        Ok(())
    }
}
