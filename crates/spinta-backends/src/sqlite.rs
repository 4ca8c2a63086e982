//! SQLite backend
//!
//! `sqlite://` opens an in-memory database, `sqlite:///path` a file. The
//! connection is opened on first use and kept for the life of the backend.
//! Schemas are attached databases; their files are recorded in a
//! `_schemas` table so they are attached again on the next connect.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Number, Value};
use spinta_core::BackendConfig;
use spinta_manifest::{DataType, Manifest, SchemaMigration, SchemaMigrator};
use tracing::{debug, info, warn};

use crate::backend::{Backend, ColumnInfo, ForeignKey, SqlDdl, TableHandle, Transaction};
use crate::dialect::{Dialect, SqliteDialect};
use crate::error::BackendError;
use crate::table::{TableName, TableType};

const SCHEMAS_TABLE: &str = "_schemas";

pub struct SqliteBackend {
    name: String,
    kind: String,
    /// `None` for in-memory databases
    path: Option<PathBuf>,
    dialect: Arc<dyn Dialect>,
    conn: Mutex<Option<Connection>>,
    tables: Mutex<HashMap<TableName, TableHandle>>,
}

impl SqliteBackend {
    /// Parse the DSN; nothing is opened until the first query
    pub fn load(
        name: &str,
        config: &BackendConfig,
        dialect: Arc<dyn Dialect>,
    ) -> Result<Self, BackendError> {
        let dsn = config.resolved_dsn();
        let path = match dsn.as_str() {
            "sqlite://" => None,
            _ => match dsn.strip_prefix("sqlite:///") {
                Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
                _ => return Err(BackendError::UnsupportedDsn(dsn)),
            },
        };
        Ok(Self {
            name: name.to_string(),
            kind: config.kind.clone(),
            path,
            dialect,
            conn: Mutex::new(None),
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn open_in_memory(name: &str) -> Result<Self, BackendError> {
        Self::load(
            name,
            &BackendConfig::new("sql/sqlite", "sqlite://"),
            Arc::new(SqliteDialect),
        )
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run statements outside of a transaction scope
    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))?;
        self.forget_tables();
        Ok(())
    }

    fn connect(&self) -> Result<Connection, BackendError> {
        let conn = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        info!(backend = %self.name, path = ?self.path, "connected");

        let registered = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [SCHEMAS_TABLE],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .is_some();
        if registered {
            let schemas: Vec<(String, String)> = {
                let mut stmt = conn.prepare("SELECT name, file FROM _schemas ORDER BY name")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            for (schema, file) in schemas {
                conn.execute(
                    &format!("ATTACH DATABASE ?1 AS {}", self.dialect.quote_ident(&schema)),
                    [&file],
                )?;
                debug!(backend = %self.name, schema = %schema, "schema attached");
            }
        }
        Ok(conn)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Option<Connection>>, BackendError> {
        // Statements either complete or roll back, so a poisoned guard still
        // holds a usable connection.
        let mut guard = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        Ok(guard)
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut Connection) -> Result<T, BackendError>,
    {
        let mut guard = self.lock_conn()?;
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(BackendError::NotConnected(self.name.clone())),
        }
    }

    fn forget_tables(&self) {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn schema_file(&self, schema: &str) -> String {
        match &self.path {
            None => ":memory:".to_string(),
            Some(path) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "spinta".to_string());
                let safe: String = schema
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect();
                path.with_file_name(format!("{}__{}.db", stem, safe))
                    .to_string_lossy()
                    .into_owned()
            }
        }
    }

    /// `[schema.]pragma(table)`
    fn pragma_target(&self, pragma: &str, table: &TableName) -> String {
        let name = self.dialect.quote_ident(&table.name);
        match &table.schema {
            Some(schema) => format!("{}.{}({})", self.dialect.quote_ident(schema), pragma, name),
            None => format!("{}({})", pragma, name),
        }
    }

    fn master(&self, schema: Option<&str>) -> String {
        match schema {
            Some(schema) => format!("{}.sqlite_master", self.dialect.quote_ident(schema)),
            None => "sqlite_master".to_string(),
        }
    }

    /// DDL for one schema migration
    pub fn migration_sql(&self, migration: &SchemaMigration) -> String {
        let q = |name: &str| self.dialect.quote_ident(name);
        match migration {
            SchemaMigration::CreateTable { table, columns } => {
                let mut defs = vec![
                    format!("{} TEXT PRIMARY KEY", q("_id")),
                    format!("{} TEXT", q("_revision")),
                ];
                defs.extend(
                    columns
                        .iter()
                        .map(|(column, dtype)| format!("{} {}", q(column), sql_type(*dtype))),
                );
                format!("CREATE TABLE IF NOT EXISTS {} ({})", q(table), defs.join(", "))
            }
            SchemaMigration::RenameTable { from, to } => {
                format!("ALTER TABLE {} RENAME TO {}", q(from), q(to))
            }
            SchemaMigration::DropTable { table } => format!("DROP TABLE IF EXISTS {}", q(table)),
            SchemaMigration::AddColumn { table, column, dtype } => format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                q(table),
                q(column),
                sql_type(*dtype)
            ),
            SchemaMigration::DropColumn { table, column } => {
                format!("ALTER TABLE {} DROP COLUMN {}", q(table), q(column))
            }
            SchemaMigration::RenameColumn { table, from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                q(table),
                q(from),
                q(to)
            ),
        }
    }
}

/// Column type for a property type
pub fn sql_type(dtype: DataType) -> &'static str {
    match dtype {
        DataType::Integer => "INTEGER",
        DataType::Number | DataType::Money => "REAL",
        DataType::Boolean => "BOOLEAN",
        DataType::Binary | DataType::File | DataType::Image => "BLOB",
        _ => "TEXT",
    }
}

pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

pub(crate) fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(hex::encode(blob)),
    }
}

fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Map<String, Value>>, BackendError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql_value)))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (index, name) in names.iter().enumerate() {
            object.insert(name.clone(), from_sql_value(row.get_ref(index)?));
        }
        result.push(object);
    }
    Ok(result)
}

pub struct SqliteTransaction<'a> {
    backend: &'a str,
    guard: MutexGuard<'a, Option<Connection>>,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn conn(&self) -> Result<&Connection, BackendError> {
        self.guard
            .as_ref()
            .ok_or_else(|| BackendError::NotConnected(self.backend.to_string()))
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, BackendError> {
        let conn = self.conn()?;
        Ok(conn.execute(sql, params_from_iter(params.iter().map(to_sql_value)))?)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Map<String, Value>>, BackendError> {
        query_rows(self.conn()?, sql, params)
    }

    fn commit(mut self: Box<Self>) -> Result<(), BackendError> {
        self.conn()?.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(conn) = self.guard.as_ref() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(backend = %self.backend, error = %e, "rollback failed");
            }
        }
    }
}

impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    fn prepare(&self, manifest: &Manifest) -> Result<(), BackendError> {
        self.forget_tables();
        let mut missing = 0;
        for (_, model) in manifest.get_models() {
            let Some(resource) = model.resource else {
                continue;
            };
            if manifest.resource(resource).backend != self.name || model.external.is_empty() {
                continue;
            }
            match self.get_table(&TableName::new(model.external.clone())) {
                Ok(_) => {}
                Err(BackendError::TableNotFound(table)) => {
                    warn!(backend = %self.name, model = %model.name, table = %table, "source table not found");
                    missing += 1;
                }
                Err(e) => return Err(e),
            }
        }
        debug!(backend = %self.name, missing, "backend prepared");
        Ok(())
    }

    fn wait(&self, fail: bool) -> Result<bool, BackendError> {
        let ping = self.with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?));
        match ping {
            Ok(_) => Ok(true),
            Err(e) if fail => Err(BackendError::NotReady {
                name: self.name.clone(),
                message: e.to_string(),
            }),
            Err(e) => {
                warn!(backend = %self.name, error = %e, "backend not ready");
                Ok(false)
            }
        }
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BackendError> {
        let guard = self.lock_conn()?;
        let transaction = SqliteTransaction {
            backend: &self.name,
            guard,
            finished: false,
        };
        transaction.conn()?.execute_batch("BEGIN")?;
        Ok(Box::new(transaction))
    }

    fn get_table(&self, table: &TableName) -> Result<TableHandle, BackendError> {
        if let Some(handle) = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(table)
        {
            return Ok(handle.clone());
        }

        let pragma = format!("PRAGMA {}", self.pragma_target("table_info", table));
        let columns = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&pragma)?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        sql_type: row.get(2)?,
                        not_null: row.get::<_, i64>(3)? != 0,
                        primary_key: row.get::<_, i64>(5)? as usize,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })?;
        if columns.is_empty() {
            return Err(BackendError::TableNotFound(table.to_string()));
        }

        let handle = TableHandle {
            table: table.clone(),
            columns,
        };
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(table.clone(), handle.clone());
        Ok(handle)
    }

    fn ddl(&self) -> Option<&dyn SqlDdl> {
        Some(self)
    }
}

impl SqlDdl for SqliteBackend {
    fn list_tables(&self, schema: Option<&str>) -> Result<Vec<String>, BackendError> {
        let sql = format!(
            "SELECT name FROM {} WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             AND name != '{}' ORDER BY name",
            self.master(schema),
            SCHEMAS_TABLE
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }

    fn table_exists(&self, table: &TableName) -> Result<bool, BackendError> {
        if let Some(schema) = &table.schema {
            if !self.list_schemas()?.contains(schema) {
                return Ok(false);
            }
        }
        let sql = format!(
            "SELECT name FROM {} WHERE type = 'table' AND name = ?1",
            self.master(table.schema.as_deref())
        );
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, [&table.name], |row| row.get::<_, String>(0))
                .optional()?
                .is_some())
        })
    }

    fn list_schemas(&self) -> Result<Vec<String>, BackendError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("PRAGMA database_list")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names
                .into_iter()
                .filter(|name| name != "main" && name != "temp")
                .collect())
        })
    }

    fn foreign_keys(&self, table: &TableName) -> Result<Vec<ForeignKey>, BackendError> {
        let sql = format!("PRAGMA {}", self.pragma_target("foreign_key_list", table));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            // (id, seq, table, from, to); `to` is null for implicit primary keys
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let mut keys: Vec<(i64, ForeignKey)> = Vec::new();
            for (id, ref_table, from, to) in rows {
                match keys.iter_mut().find(|(key_id, _)| *key_id == id) {
                    Some((_, key)) => {
                        key.columns.push(from);
                        key.ref_columns.extend(to);
                    }
                    None => keys.push((
                        id,
                        ForeignKey {
                            columns: vec![from],
                            ref_table,
                            ref_columns: to.into_iter().collect(),
                        },
                    )),
                }
            }
            Ok(keys.into_iter().map(|(_, key)| key).collect())
        })
    }

    fn unique_indexes(&self, table: &TableName) -> Result<Vec<Vec<String>>, BackendError> {
        let list = format!("PRAGMA {}", self.pragma_target("index_list", table));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&list)?;
            // (seq, name, unique, origin, partial)
            let indexes = stmt
                .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut unique = Vec::new();
            for (index, flag) in indexes.into_iter().rev() {
                if flag == 0 {
                    continue;
                }
                let info = match &table.schema {
                    Some(schema) => format!(
                        "PRAGMA {}.index_info({})",
                        self.dialect.quote_ident(schema),
                        self.dialect.quote_ident(&index)
                    ),
                    None => format!("PRAGMA index_info({})", self.dialect.quote_ident(&index)),
                };
                let mut stmt = conn.prepare(&info)?;
                let columns = stmt
                    .query_map([], |row| row.get::<_, String>(2))?
                    .collect::<Result<Vec<_>, _>>()?;
                unique.push(columns);
            }
            Ok(unique)
        })
    }

    fn create_schema(&self, schema: &str) -> Result<(), BackendError> {
        if self.list_schemas()?.iter().any(|s| s == schema) {
            return Ok(());
        }
        let file = self.schema_file(schema);
        let quoted = self.dialect.quote_ident(schema);
        self.with_conn(|conn| {
            conn.execute(&format!("ATTACH DATABASE ?1 AS {}", quoted), [&file])?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS _schemas (name TEXT PRIMARY KEY, file TEXT NOT NULL)",
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO _schemas (name, file) VALUES (?1, ?2)",
                [schema, file.as_str()],
            )?;
            Ok(())
        })?;
        info!(backend = %self.name, schema, "schema created");
        Ok(())
    }

    fn create_redirect_table(&self, model: &str) -> Result<bool, BackendError> {
        let table = self.locate_model_table(model, &TableType::Redirect)?;
        if self.table_exists(&table)? {
            return Ok(false);
        }
        let q = |name: &str| self.dialect.quote_ident(name);
        self.execute_batch(&format!(
            "CREATE TABLE {} ({} TEXT PRIMARY KEY, {} TEXT NOT NULL)",
            self.dialect.qualify(&table),
            q("_id"),
            q("redirect")
        ))?;
        info!(backend = %self.name, table = %table, "redirect table created");
        Ok(true)
    }

    fn create_changelog_table(&self, model: &str) -> Result<bool, BackendError> {
        let table = self.locate_model_table(model, &TableType::Changelog)?;
        if self.table_exists(&table)? {
            return Ok(false);
        }
        let q = |name: &str| self.dialect.quote_ident(name);
        self.execute_batch(&format!(
            "CREATE TABLE {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {} TEXT, {} TEXT, {} TEXT, \
             {} TEXT, {} TEXT, {} TEXT)",
            self.dialect.qualify(&table),
            q("_id"),
            q("_revision"),
            q("_txn"),
            q("_rid"),
            q("datetime"),
            q("action"),
            q("data")
        ))?;
        info!(backend = %self.name, table = %table, "changelog table created");
        Ok(true)
    }

    fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), BackendError> {
        let source = self.dialect.qualify(from);
        if from.schema == to.schema {
            self.execute_batch(&format!(
                "ALTER TABLE {} RENAME TO {}",
                source,
                self.dialect.quote_ident(&to.name)
            ))?;
            return Ok(());
        }

        // Moving between attached databases: recreate with the original
        // definition, copy rows, drop the source.
        let master = self.master(from.schema.as_deref());
        let target = self.dialect.qualify(to);
        self.with_conn(|conn| {
            let definition: Option<String> = conn
                .query_row(
                    &format!("SELECT sql FROM {} WHERE type = 'table' AND name = ?1", master),
                    [&from.name],
                    |row| row.get(0),
                )
                .optional()?;
            let definition = definition.ok_or_else(|| BackendError::TableNotFound(from.to_string()))?;
            let columns = definition
                .find('(')
                .map(|start| &definition[start..])
                .ok_or_else(|| BackendError::TableNotFound(from.to_string()))?;

            let tx = conn.transaction()?;
            tx.execute_batch(&format!(
                "CREATE TABLE {target} {columns};
                 INSERT INTO {target} SELECT * FROM {source};
                 DROP TABLE {source};"
            ))?;
            tx.commit()?;
            Ok(())
        })?;
        self.forget_tables();
        debug!(backend = %self.name, from = %from, to = %to, "table moved");
        Ok(())
    }

    fn add_column(&self, table: &TableName, column: &str, dtype: DataType) -> Result<(), BackendError> {
        self.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.dialect.qualify(table),
            self.dialect.quote_ident(column),
            sql_type(dtype)
        ))?;
        debug!(backend = %self.name, table = %table, column, "column added");
        Ok(())
    }

    fn apply_migration(&self, migration: &SchemaMigration) -> Result<(), BackendError> {
        self.execute_batch(&self.migration_sql(migration))
    }
}

impl SchemaMigrator for SqliteBackend {
    fn migrate(&self, migrations: &[SchemaMigration]) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let statements: Vec<String> = migrations.iter().map(|m| self.migration_sql(m)).collect();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for statement in &statements {
                tx.execute_batch(statement)?;
            }
            tx.commit()?;
            Ok(())
        })
        .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;
        self.forget_tables();
        info!(backend = %self.name, count = migrations.len(), "schema migrations applied");
        Ok(())
    }
}
