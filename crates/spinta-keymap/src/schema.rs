//! Keymap tables and the migration ledger
//!
//! Per model: `(key, value, redirect, modified_at)`. Shared:
//! `_synchronize(model, cid, updated)` and `_migrations(migration,
//! applied_at)`. Keymaps written before redirects existed have per-model
//! tables shaped `(key, hash, value)`; `migrate_redirect` rewrites them.

use std::collections::BTreeSet;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::KeymapError;

pub const SYNCHRONIZE_TABLE: &str = "_synchronize";
pub const MIGRATIONS_TABLE: &str = "_migrations";

pub const MIGRATION_INITIAL: &str = "sql_keymap_initial";
pub const MIGRATION_REDIRECT: &str = "sql_keymap_redirect";

/// Every migration this version knows about, in order
pub const KNOWN_MIGRATIONS: [&str; 2] = [MIGRATION_INITIAL, MIGRATION_REDIRECT];

const MAX_TABLE_NAME: usize = 63;

const SHARED_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS _synchronize (
    model TEXT PRIMARY KEY,
    cid INTEGER,
    updated TEXT
);

CREATE TABLE IF NOT EXISTS _migrations (
    migration TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Table name for a model; names over 63 characters keep a prefix and get
/// an 8 hex digit hash of the full name
pub fn table_name(model: &str) -> String {
    if model.len() <= MAX_TABLE_NAME {
        return model.to_string();
    }
    let digest = hex::encode(Sha256::digest(model.as_bytes()));
    let mut cut = MAX_TABLE_NAME - 9;
    while !model.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &model[..cut], &digest[..8])
}

/// Timestamps are stored as fixed-width UTC text so they sort as written
pub(crate) fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn create_shared_tables(conn: &Connection) -> Result<(), KeymapError> {
    conn.execute_batch(SHARED_SCHEMA)?;
    Ok(())
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

pub(crate) fn create_key_table(conn: &Connection, table: &str) -> Result<(), KeymapError> {
    let q = quote(table);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {q} (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL,
             redirect TEXT,
             modified_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS {value_ix} ON {q}(value);
         CREATE INDEX IF NOT EXISTS {redirect_ix} ON {q}(redirect);
         CREATE INDEX IF NOT EXISTS {modified_ix} ON {q}(modified_at);",
        value_ix = quote(&format!("{}.value", table)),
        redirect_ix = quote(&format!("{}.redirect", table)),
        modified_ix = quote(&format!("{}.modified_at", table)),
    ))?;
    Ok(())
}

/// Pre-redirect per-model table
pub fn create_legacy_key_table(conn: &Connection, table: &str) -> Result<(), KeymapError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, hash TEXT, value TEXT NOT NULL);",
        quote(table)
    ))?;
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, KeymapError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>, KeymapError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Per-model tables, shared tables excluded
pub fn key_tables(conn: &Connection) -> Result<Vec<String>, KeymapError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table'
         AND name NOT LIKE 'sqlite_%' AND name NOT IN ('_synchronize', '_migrations')
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn is_empty_database(conn: &Connection) -> Result<bool, KeymapError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count == 0)
}

pub fn applied_migrations(conn: &Connection) -> Result<BTreeSet<String>, KeymapError> {
    if !table_exists(conn, MIGRATIONS_TABLE)? {
        return Ok(BTreeSet::new());
    }
    let mut stmt = conn.prepare("SELECT migration FROM _migrations")?;
    let applied = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(applied)
}

/// Known migrations missing from the ledger
pub fn missing_migrations(conn: &Connection) -> Result<Vec<String>, KeymapError> {
    let applied = applied_migrations(conn)?;
    Ok(KNOWN_MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(**m))
        .map(|m| m.to_string())
        .collect())
}

pub fn mark_applied(conn: &Connection, migration: &str) -> Result<(), KeymapError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (migration, applied_at) VALUES (?1, ?2)",
        params![migration, now_text()],
    )?;
    Ok(())
}

/// Tag a fresh database with every known migration. Returns whether the
/// database was fresh.
pub fn initialize(conn: &Connection) -> Result<bool, KeymapError> {
    if !is_empty_database(conn)? {
        return Ok(false);
    }
    create_shared_tables(conn)?;
    for migration in KNOWN_MIGRATIONS {
        mark_applied(conn, migration)?;
    }
    info!("initialized empty keymap database");
    Ok(true)
}

/// `sql_keymap_initial`: create the shared tables
pub fn migrate_initial(conn: &Connection) -> Result<(), KeymapError> {
    create_shared_tables(conn)?;
    mark_applied(conn, MIGRATION_INITIAL)?;
    info!(migration = MIGRATION_INITIAL, "keymap migration applied");
    Ok(())
}

/// Per-model tables still in the pre-redirect shape
pub fn legacy_tables(conn: &Connection) -> Result<Vec<String>, KeymapError> {
    let mut legacy = Vec::new();
    for table in key_tables(conn)? {
        if !column_names(conn, &table)?.iter().any(|c| c == "redirect") {
            legacy.push(table);
        }
    }
    Ok(legacy)
}

/// `sql_keymap_redirect`: rewrite every legacy per-model table into the
/// `(key, value, redirect, modified_at)` shape
///
/// Rows are copied one at a time into `<table>__new`; the original is
/// renamed to `<table>__old`, the new table takes its name and the
/// original is dropped. A failure drops the temp table and restores the
/// original name. `progress` is called with `(table, copied)` per row.
pub fn migrate_redirect<F>(conn: &mut Connection, mut progress: F) -> Result<(), KeymapError>
where
    F: FnMut(&str, usize),
{
    for table in legacy_tables(conn)? {
        if let Err(e) = rewrite_table(conn, &table, &mut progress) {
            warn!(table = %table, error = %e, "redirect migration failed, restoring table");
            restore(conn, &table)?;
            return Err(e);
        }
        info!(table = %table, "keymap table migrated");
    }
    mark_applied(conn, MIGRATION_REDIRECT)?;
    info!(migration = MIGRATION_REDIRECT, "keymap migration applied");
    Ok(())
}

fn rewrite_table<F>(conn: &mut Connection, table: &str, progress: &mut F) -> Result<(), KeymapError>
where
    F: FnMut(&str, usize),
{
    let temp = format!("{}__new", table);
    let old = format!("{}__old", table);
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(&temp)))?;
    create_key_table(conn, &temp)?;

    let rows: Vec<(String, String)> = {
        let mut stmt = conn.prepare(&format!("SELECT key, value FROM {} ORDER BY rowid", quote(table)))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let now = now_text();
    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare(&format!(
            "INSERT OR IGNORE INTO {} (key, value, redirect, modified_at) VALUES (?1, ?2, NULL, ?3)",
            quote(&temp)
        ))?;
        for (copied, (key, value)) in rows.iter().enumerate() {
            insert.execute(params![key, value, now])?;
            progress(table, copied + 1);
        }
    }
    tx.commit()?;

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "ALTER TABLE {t} RENAME TO {o};
         ALTER TABLE {n} RENAME TO {t};
         DROP TABLE {o};",
        t = quote(table),
        o = quote(&old),
        n = quote(&temp),
    ))?;
    tx.commit()?;
    debug!(table, rows = rows.len(), "legacy rows copied");
    Ok(())
}

fn restore(conn: &Connection, table: &str) -> Result<(), KeymapError> {
    let temp = format!("{}__new", table);
    let old = format!("{}__old", table);
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(&temp)))?;
    if !table_exists(conn, table)? && table_exists(conn, &old)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&old),
            quote(table)
        ))?;
    }
    Ok(())
}
