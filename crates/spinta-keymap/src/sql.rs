//! SQLite keymap

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use spinta_core::KeymapConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::KeymapError;
use crate::schema::{self, quote, table_name};
use crate::value::{encode_value, is_valid, KeyValue};

/// One change event fed to [`KeyMap::synchronize`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeymapSyncData {
    /// Model name
    pub name: String,
    /// Surrogate key of the row
    pub identifier: String,
    /// Key this row forwards to
    #[serde(default)]
    pub redirect: Option<String>,
    /// Natural key, already canonical
    #[serde(default)]
    pub value: Value,
    /// Remaining change data; `_created` sets the row timestamp
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub processed: usize,
    pub written: usize,
    pub redirected: usize,
    pub skipped: usize,
    pub batches: usize,
}

/// Bidirectional surrogate/natural key mapping per model
pub trait KeyMap: Send + Sync {
    /// Surrogate key for `value`, created on first sight. Invalid values
    /// map to `None`.
    fn encode(
        &self,
        name: &str,
        value: &KeyValue,
        primary_key: Option<&str>,
    ) -> Result<Option<String>, KeymapError>;

    /// Canonical natural key stored under `key`
    fn decode(&self, name: &str, key: &str) -> Result<Value, KeymapError>;

    /// Terminal key of the redirect chain starting at `key`
    fn decode_redirect(&self, name: &str, key: &str) -> Result<String, KeymapError>;

    fn has_key(&self, name: &str, key: &str) -> Result<bool, KeymapError>;

    fn contains(&self, name: &str, value: &KeyValue) -> Result<bool, KeymapError>;

    fn synchronize(
        &self,
        events: &mut dyn Iterator<Item = KeymapSyncData>,
    ) -> Result<SyncStats, KeymapError>;

    fn validate_data(&self, name: &str) -> Result<(), KeymapError>;

    fn get_last_synced_id(&self, name: &str) -> Result<Option<i64>, KeymapError>;

    fn update_sync_data(
        &self,
        name: &str,
        cid: i64,
        time: DateTime<Utc>,
    ) -> Result<(), KeymapError>;
}

struct Inner {
    conn: Connection,
    /// Known tables, flagged when still in the pre-redirect shape
    tables: HashMap<String, bool>,
}

impl Inner {
    fn table(&mut self, name: &str) -> Result<String, KeymapError> {
        Ok(self.table_shape(name)?.0)
    }

    fn table_shape(&mut self, name: &str) -> Result<(String, bool), KeymapError> {
        let table = table_name(name);
        let legacy = match self.tables.get(&table) {
            Some(legacy) => *legacy,
            None => {
                let legacy = if schema::table_exists(&self.conn, &table)? {
                    !schema::column_names(&self.conn, &table)?
                        .iter()
                        .any(|c| c == "redirect")
                } else {
                    schema::create_key_table(&self.conn, &table)?;
                    false
                };
                debug!(model = name, table = %table, legacy, "keymap table ready");
                self.tables.insert(table.clone(), legacy);
                legacy
            }
        };
        Ok((quote(&table), legacy))
    }
}

pub struct SqlKeyMap {
    inner: Mutex<Inner>,
    config: KeymapConfig,
    legacy: AtomicBool,
}

/// `sqlite://` (or an empty DSN) is in-memory, `sqlite:///path` a file
pub fn open_connection(dsn: &str) -> Result<Connection, KeymapError> {
    let dsn = spinta_core::expand_env(dsn);
    match dsn.as_str() {
        "" | "sqlite://" => Ok(Connection::open_in_memory()?),
        _ => match dsn.strip_prefix("sqlite:///") {
            Some(path) if !path.is_empty() => Ok(Connection::open(path)?),
            _ => Err(KeymapError::UnsupportedDsn(dsn)),
        },
    }
}

impl SqlKeyMap {
    /// Open the keymap named by `config.dsn`
    ///
    /// Outside upgrade mode a database missing any known migration is
    /// refused with `MigrationRequired`.
    pub fn open(config: &KeymapConfig, upgrade_mode: bool) -> Result<Self, KeymapError> {
        Self::from_connection(open_connection(&config.dsn)?, config, upgrade_mode)
    }

    pub fn open_in_memory() -> Result<Self, KeymapError> {
        Self::from_connection(Connection::open_in_memory()?, &KeymapConfig::default(), false)
    }

    pub fn from_connection(
        conn: Connection,
        config: &KeymapConfig,
        upgrade_mode: bool,
    ) -> Result<Self, KeymapError> {
        schema::initialize(&conn)?;
        let missing = schema::missing_migrations(&conn)?;
        if !missing.is_empty() {
            if !upgrade_mode {
                return Err(KeymapError::MigrationRequired { missing });
            }
            warn!(migrations = ?missing, "keymap opened with pending migrations");
        }
        let redirect_applied = !missing.iter().any(|m| m == schema::MIGRATION_REDIRECT);
        let legacy = config.legacy_sync.unwrap_or(!redirect_applied);
        info!(legacy, "keymap opened");

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                tables: HashMap::new(),
            }),
            config: config.clone(),
            legacy: AtomicBool::new(legacy),
        })
    }

    pub fn config(&self) -> &KeymapConfig {
        &self.config
    }

    /// Whether synchronize runs the pre-redirect behaviour
    pub fn legacy(&self) -> bool {
        self.legacy.load(Ordering::SeqCst)
    }

    pub fn missing_migrations(&self) -> Result<Vec<String>, KeymapError> {
        schema::missing_migrations(&self.lock().conn)
    }

    pub fn migrate_initial(&self) -> Result<(), KeymapError> {
        schema::migrate_initial(&self.lock().conn)
    }

    /// Rewrite legacy per-model tables; synchronize leaves legacy mode
    /// afterwards unless `legacy_sync` is pinned in the config
    pub fn migrate_redirect<F>(&self, progress: F) -> Result<(), KeymapError>
    where
        F: FnMut(&str, usize),
    {
        let mut inner = self.lock();
        inner.tables.clear();
        schema::migrate_redirect(&mut inner.conn, progress)?;
        if self.config.legacy_sync.is_none() {
            self.legacy.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Model names with a key table
    pub fn models(&self) -> Result<Vec<String>, KeymapError> {
        schema::key_tables(&self.lock().conn)
    }

    /// Keys sharing a value with another non-redirected key, grouped by
    /// value, oldest first
    pub fn duplicate_keys(&self, name: &str) -> Result<Vec<Vec<String>>, KeymapError> {
        let mut inner = self.lock();
        let (table, legacy_shape) = inner.table_shape(name)?;
        if legacy_shape {
            return Ok(Vec::new());
        }
        let mut stmt = inner.conn.prepare(&format!(
            "SELECT value, key FROM {table} WHERE redirect IS NULL AND value IN (
                 SELECT value FROM {table} WHERE redirect IS NULL
                 GROUP BY value HAVING COUNT(*) > 1)
             ORDER BY value, modified_at, rowid"
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for (value, key) in rows {
            match groups.last_mut() {
                Some((last, keys)) if *last == value => keys.push(key),
                _ => groups.push((value, vec![key])),
            }
        }
        Ok(groups.into_iter().map(|(_, keys)| keys).collect())
    }

    /// Point `from` at `to`, regardless of the synchronize mode
    pub fn redirect_key(&self, name: &str, from: &str, to: &str) -> Result<bool, KeymapError> {
        let mut inner = self.lock();
        let table = inner.table(name)?;
        let updated = inner.conn.execute(
            &format!("UPDATE {table} SET redirect = ?2, modified_at = ?3 WHERE key = ?1"),
            params![from, to, schema::now_text()],
        )?;
        Ok(updated > 0)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every write runs inside a transaction, so a poisoned lock still
        // guards a consistent connection.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn find_key(conn: &Connection, table: &str, value: &str) -> Result<Option<String>, KeymapError> {
        let active: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT key FROM {table} WHERE value = ?1 AND redirect IS NULL
                     ORDER BY modified_at DESC, rowid LIMIT 1"
                ),
                [value],
                |row| row.get(0),
            )
            .optional()?;
        if active.is_some() {
            return Ok(active);
        }
        // A redirected row still answers for the value it was created with.
        let any: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT key FROM {table} WHERE value = ?1
                     ORDER BY modified_at DESC, rowid LIMIT 1"
                ),
                [value],
                |row| row.get(0),
            )
            .optional()?;
        Ok(any)
    }

    fn redirect_of(
        conn: &Connection,
        table: &str,
        key: &str,
    ) -> Result<Option<Option<String>>, KeymapError> {
        let found = conn
            .query_row(
                &format!("SELECT redirect FROM {table} WHERE key = ?1"),
                [key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(found)
    }

    /// Tables not yet rewritten by the redirect migration only take plain
    /// `(key, hash, value)` rows
    fn apply_legacy_shaped(
        conn: &Connection,
        table: &str,
        event: &KeymapSyncData,
        stats: &mut SyncStats,
    ) -> Result<(), KeymapError> {
        if !is_valid(&event.value) {
            stats.skipped += 1;
            return Ok(());
        }
        let value = encode_value(&event.value)?;
        let hash = hex::encode(Sha256::digest(value.as_bytes()));
        conn.execute(
            &format!("INSERT OR REPLACE INTO {table} (key, hash, value) VALUES (?1, ?2, ?3)"),
            params![event.identifier, hash, value],
        )?;
        stats.written += 1;
        Ok(())
    }

    fn apply_event(
        &self,
        conn: &Connection,
        table: &str,
        event: &KeymapSyncData,
        stats: &mut SyncStats,
    ) -> Result<(), KeymapError> {
        let modified_at = event
            .data
            .get("_created")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(schema::now_text);
        let valid = is_valid(&event.value);

        if self.legacy() {
            if !valid {
                stats.skipped += 1;
                return Ok(());
            }
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {table} (key, value, modified_at) VALUES (?1, ?2, ?3)"
                ),
                params![event.identifier, encode_value(&event.value)?, modified_at],
            )?;
            stats.written += 1;
            return Ok(());
        }

        if let Some(redirect) = &event.redirect {
            let updated = conn.execute(
                &format!("UPDATE {table} SET redirect = ?2, modified_at = ?3 WHERE key = ?1"),
                params![event.identifier, redirect, modified_at],
            )?;
            if updated == 0 && valid {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (key, value, redirect, modified_at)
                         VALUES (?1, ?2, ?3, ?4)"
                    ),
                    params![event.identifier, encode_value(&event.value)?, redirect, modified_at],
                )?;
            } else if updated == 0 {
                stats.skipped += 1;
                return Ok(());
            }
            stats.redirected += 1;
            return Ok(());
        }

        if !valid {
            stats.skipped += 1;
            return Ok(());
        }
        conn.execute(
            &format!(
                "INSERT INTO {table} (key, value, redirect, modified_at) VALUES (?1, ?2, NULL, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     redirect = NULL,
                     modified_at = excluded.modified_at"
            ),
            params![event.identifier, encode_value(&event.value)?, modified_at],
        )?;
        stats.written += 1;
        Ok(())
    }
}

impl KeyMap for SqlKeyMap {
    fn encode(
        &self,
        name: &str,
        value: &KeyValue,
        primary_key: Option<&str>,
    ) -> Result<Option<String>, KeymapError> {
        let canonical = value.canonical();
        if !is_valid(&canonical) {
            return Ok(None);
        }
        let encoded = encode_value(&canonical)?;

        let mut inner = self.lock();
        let table = inner.table(name)?;
        let conn = &inner.conn;

        if let Some(found) = Self::find_key(conn, &table, &encoded)? {
            return match primary_key {
                Some(given) if given != found => Err(KeymapError::GivenKeyMissmatch {
                    name: name.to_string(),
                    given: given.to_string(),
                    found,
                }),
                _ => Ok(Some(found)),
            };
        }

        let key = primary_key
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {table} (key, value, redirect, modified_at) VALUES (?1, ?2, NULL, ?3)"
            ),
            params![key, encoded, schema::now_text()],
        );
        match inserted {
            Ok(_) => Ok(Some(key)),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(KeymapError::KeyTaken {
                    name: name.to_string(),
                    key,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn decode(&self, name: &str, key: &str) -> Result<Value, KeymapError> {
        let mut inner = self.lock();
        let table = inner.table(name)?;
        let text: Option<String> = inner
            .conn
            .query_row(
                &format!("SELECT value FROM {table} WHERE key = ?1"),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Err(KeymapError::KeyNotFound {
                name: name.to_string(),
                key: key.to_string(),
            }),
        }
    }

    fn decode_redirect(&self, name: &str, key: &str) -> Result<String, KeymapError> {
        let mut inner = self.lock();
        let table = inner.table(name)?;
        let conn = &inner.conn;

        let mut current = key.to_string();
        let mut seen = HashSet::new();
        let mut first = true;
        loop {
            if !seen.insert(current.clone()) {
                return Err(KeymapError::RedirectLoop {
                    name: name.to_string(),
                    key: key.to_string(),
                });
            }
            match Self::redirect_of(conn, &table, &current)? {
                Some(Some(next)) => {
                    current = next;
                    first = false;
                }
                Some(None) => return Ok(current),
                None if first => {
                    return Err(KeymapError::KeyNotFound {
                        name: name.to_string(),
                        key: key.to_string(),
                    })
                }
                None => return Ok(current),
            }
        }
    }

    fn has_key(&self, name: &str, key: &str) -> Result<bool, KeymapError> {
        let mut inner = self.lock();
        let table = inner.table(name)?;
        Ok(Self::redirect_of(&inner.conn, &table, key)?.is_some())
    }

    fn contains(&self, name: &str, value: &KeyValue) -> Result<bool, KeymapError> {
        let canonical = value.canonical();
        if !is_valid(&canonical) {
            return Ok(false);
        }
        let encoded = encode_value(&canonical)?;
        let mut inner = self.lock();
        let table = inner.table(name)?;
        Ok(Self::find_key(&inner.conn, &table, &encoded)?.is_some())
    }

    /// Apply change events in arrival order, committing every
    /// `sync_transaction_size` events
    ///
    /// A failing event is logged and skipped; the batch it belongs to still
    /// commits.
    fn synchronize(
        &self,
        events: &mut dyn Iterator<Item = KeymapSyncData>,
    ) -> Result<SyncStats, KeymapError> {
        let batch_size = self.config.sync_transaction_size.max(1);
        let mut stats = SyncStats::default();
        let mut pending: VecDeque<KeymapSyncData> = VecDeque::with_capacity(batch_size.min(1024));

        loop {
            // The stream is drained with the connection unlocked so encode
            // calls interleave between batches.
            pending.extend((&mut *events).take(batch_size));
            if pending.is_empty() {
                break;
            }

            let mut inner = self.lock();
            let mut tables = Vec::with_capacity(pending.len());
            for event in &pending {
                tables.push(inner.table_shape(&event.name)?);
            }

            let tx = inner.conn.transaction()?;
            for (event, (table, legacy_shape)) in pending.drain(..).zip(tables) {
                stats.processed += 1;
                let applied = if legacy_shape {
                    Self::apply_legacy_shaped(&tx, &table, &event, &mut stats)
                } else {
                    self.apply_event(&tx, &table, &event, &mut stats)
                };
                if let Err(e) = applied {
                    warn!(
                        model = %event.name,
                        key = %event.identifier,
                        error = %e,
                        "skipping keymap sync event"
                    );
                    stats.skipped += 1;
                }
            }
            tx.commit()?;
            stats.batches += 1;
            debug!(processed = stats.processed, "keymap sync batch committed");
        }

        info!(
            processed = stats.processed,
            written = stats.written,
            redirected = stats.redirected,
            skipped = stats.skipped,
            legacy = self.legacy(),
            "keymap synchronized"
        );
        Ok(stats)
    }

    fn validate_data(&self, name: &str) -> Result<(), KeymapError> {
        let mut inner = self.lock();
        let table = inner.table(name)?;
        let counts: Vec<i64> = {
            let mut stmt = inner.conn.prepare(&format!(
                "SELECT COUNT(*) FROM {table} WHERE redirect IS NULL
                 GROUP BY value HAVING COUNT(*) > 1"
            ))?;
            let counts = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            counts
        };
        if counts.is_empty() {
            return Ok(());
        }

        let error = KeymapError::DuplicateMapping {
            name: name.to_string(),
            key_count: counts.len(),
            affected_count: counts.iter().map(|c| *c as usize).sum(),
        };
        if self.config.duplicate_warn_only {
            warn!(model = name, error = %error, "duplicate keymap values");
            return Ok(());
        }
        Err(error)
    }

    fn get_last_synced_id(&self, name: &str) -> Result<Option<i64>, KeymapError> {
        let inner = self.lock();
        schema::create_shared_tables(&inner.conn)?;
        let cid: Option<Option<i64>> = inner
            .conn
            .query_row(
                "SELECT cid FROM _synchronize WHERE model = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cid.flatten())
    }

    fn update_sync_data(
        &self,
        name: &str,
        cid: i64,
        time: DateTime<Utc>,
    ) -> Result<(), KeymapError> {
        let inner = self.lock();
        schema::create_shared_tables(&inner.conn)?;
        inner.conn.execute(
            "INSERT INTO _synchronize (model, cid, updated) VALUES (?1, ?2, ?3)
             ON CONFLICT(model) DO UPDATE SET cid = excluded.cid, updated = excluded.updated",
            params![name, cid, time.to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_connection_dsn() {
        assert!(open_connection("").is_ok());
        assert!(open_connection("sqlite://").is_ok());
        assert!(matches!(
            open_connection("postgresql://localhost/keymap"),
            Err(KeymapError::UnsupportedDsn(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let keymap = SqlKeyMap::open_in_memory().unwrap();
        assert_eq!(keymap.encode("X", &KeyValue::Null, None).unwrap(), None);
        let nulls = KeyValue::Tuple(vec![KeyValue::Null, KeyValue::Null]);
        assert_eq!(keymap.encode("X", &nulls, None).unwrap(), None);
        assert!(!keymap.contains("X", &nulls).unwrap());
    }

    #[test]
    fn test_given_key() {
        let keymap = SqlKeyMap::open_in_memory().unwrap();
        let key = keymap.encode("X", &"a".into(), Some("k1")).unwrap();
        assert_eq!(key.as_deref(), Some("k1"));
        assert_eq!(keymap.encode("X", &"a".into(), Some("k1")).unwrap(), key);

        let err = keymap.encode("X", &"a".into(), Some("k2")).unwrap_err();
        assert!(matches!(err, KeymapError::GivenKeyMissmatch { .. }));
    }

    #[test]
    fn test_tuple_keys() {
        let keymap = SqlKeyMap::open_in_memory().unwrap();
        let value = KeyValue::Tuple(vec!["LT".into(), KeyValue::Int(1)]);
        let key = keymap.encode("X", &value, None).unwrap().unwrap();
        assert_eq!(keymap.decode("X", &key).unwrap(), json!(["LT", 1]));
    }

    #[test]
    fn test_decode_missing_key() {
        let keymap = SqlKeyMap::open_in_memory().unwrap();
        assert!(matches!(
            keymap.decode("X", "nope"),
            Err(KeymapError::KeyNotFound { .. })
        ));
        assert!(!keymap.has_key("X", "nope").unwrap());
    }

    #[test]
    fn test_redirect_loop_is_detected() {
        let keymap = SqlKeyMap::open_in_memory().unwrap();
        let events = vec![
            KeymapSyncData {
                name: "X".into(),
                identifier: "a".into(),
                redirect: Some("b".into()),
                value: json!("va"),
                ..Default::default()
            },
            KeymapSyncData {
                name: "X".into(),
                identifier: "b".into(),
                redirect: Some("a".into()),
                value: json!("vb"),
                ..Default::default()
            },
        ];
        keymap.synchronize(&mut events.into_iter()).unwrap();
        assert!(matches!(
            keymap.decode_redirect("X", "a"),
            Err(KeymapError::RedirectLoop { .. })
        ));
    }

    #[test]
    fn test_sync_cursor() {
        let keymap = SqlKeyMap::open_in_memory().unwrap();
        assert_eq!(keymap.get_last_synced_id("X").unwrap(), None);
        keymap.update_sync_data("X", 10, Utc::now()).unwrap();
        keymap.update_sync_data("X", 12, Utc::now()).unwrap();
        assert_eq!(keymap.get_last_synced_id("X").unwrap(), Some(12));
    }

    #[test]
    fn test_batches_commit_every_n_events() {
        let config = KeymapConfig {
            sync_transaction_size: 2,
            ..KeymapConfig::default()
        };
        let keymap =
            SqlKeyMap::from_connection(Connection::open_in_memory().unwrap(), &config, false)
                .unwrap();
        let events = (0..5).map(|i| KeymapSyncData {
            name: "X".into(),
            identifier: format!("k{}", i),
            value: json!(i),
            ..Default::default()
        });
        let stats = keymap.synchronize(&mut events.into_iter()).unwrap();
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.written, 5);
    }
}
