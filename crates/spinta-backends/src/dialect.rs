//! SQL dialects
//!
//! Each dialect answers three questions: how identifiers, literals and
//! parameters are written ([`QueryBuilder`]), how values are collected into
//! an array ([`GroupArray`]) and how a sort key orders nulls
//! ([`OrderDirection`]). Results sort nulls last on ascending keys and
//! first on descending keys in every dialect. Dialects are looked up by
//! backend type in a [`DialectRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use spinta_manifest::DataType;

use crate::error::BackendError;
use crate::sas;
use crate::table::TableName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

pub trait QueryBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Case folding applied to identifiers before quoting
    fn normalize_ident(&self, ident: &str) -> String {
        ident.to_string()
    }

    fn qualify(&self, table: &TableName) -> String {
        let name = self.quote_ident(&self.normalize_ident(&table.name));
        match &table.schema {
            Some(schema) => format!("{}.{}", self.quote_ident(&self.normalize_ident(schema)), name),
            None => name,
        }
    }

    /// Parameter marker for the 1-based `index`; `None` when the dialect
    /// takes literals only
    fn placeholder(&self, index: usize) -> Option<String> {
        Some(format!("?{}", index))
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Number(number) => number.to_string(),
            Value::String(text) => format!("'{}'", text.replace('\'', "''")),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    /// Post-process a value read from the database
    fn read_value(&self, value: Value, _dtype: Option<DataType>) -> Value {
        value
    }
}

pub trait GroupArray {
    fn group_array(&self, expr: &str) -> String;
}

pub trait OrderDirection {
    fn order(&self, expr: &str, direction: Direction) -> String;
}

pub trait Dialect: QueryBuilder + GroupArray + OrderDirection {}

impl<T: QueryBuilder + GroupArray + OrderDirection> Dialect for T {}

// === SQLite ===

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl QueryBuilder for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Bool(flag) => (if *flag { "1" } else { "0" }).to_string(),
            other => default_literal(other),
        }
    }
}

impl GroupArray for SqliteDialect {
    fn group_array(&self, expr: &str) -> String {
        format!("json_group_array({})", expr)
    }
}

impl OrderDirection for SqliteDialect {
    fn order(&self, expr: &str, direction: Direction) -> String {
        match direction {
            Direction::Asc => format!("{} ASC NULLS LAST", expr),
            Direction::Desc => format!("{} DESC NULLS FIRST", expr),
        }
    }
}

// === PostgreSQL ===

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl QueryBuilder for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn placeholder(&self, index: usize) -> Option<String> {
        Some(format!("${}", index))
    }
}

impl GroupArray for PostgresDialect {
    fn group_array(&self, expr: &str) -> String {
        format!("JSON_ARRAYAGG({})", expr)
    }
}

impl OrderDirection for PostgresDialect {
    fn order(&self, expr: &str, direction: Direction) -> String {
        match direction {
            Direction::Asc => format!("{} ASC", expr),
            Direction::Desc => format!("{} DESC", expr),
        }
    }
}

// === MySQL ===

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl QueryBuilder for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> Option<String> {
        Some("?".to_string())
    }
}

impl GroupArray for MysqlDialect {
    fn group_array(&self, expr: &str) -> String {
        format!("JSON_ARRAYAGG({})", expr)
    }
}

impl OrderDirection for MysqlDialect {
    fn order(&self, expr: &str, direction: Direction) -> String {
        match direction {
            Direction::Asc => format!("{expr} IS NULL, {expr} ASC"),
            Direction::Desc => format!("{expr} IS NOT NULL, {expr} DESC"),
        }
    }
}

// === SAS ===

/// Upper-case identifiers, no bound parameters, padded strings and
/// 1960-based temporal values
#[derive(Debug, Clone, Copy, Default)]
pub struct SasDialect;

impl QueryBuilder for SasDialect {
    fn name(&self) -> &'static str {
        "sas"
    }

    fn normalize_ident(&self, ident: &str) -> String {
        ident.to_uppercase()
    }

    fn placeholder(&self, _index: usize) -> Option<String> {
        None
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Bool(flag) => (if *flag { "1" } else { "0" }).to_string(),
            other => default_literal(other),
        }
    }

    fn read_value(&self, value: Value, dtype: Option<DataType>) -> Value {
        match (value, dtype) {
            (Value::String(text), _) => Value::String(sas::rstrip(&text).to_string()),
            (Value::Number(number), Some(DataType::Date)) => number
                .as_f64()
                .and_then(|days| sas::sas_date(days.trunc() as i64))
                .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null),
            (Value::Number(number), Some(DataType::Datetime)) => number
                .as_f64()
                .and_then(sas::sas_datetime)
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
                .unwrap_or(Value::Null),
            (Value::Number(number), Some(DataType::Time)) => number
                .as_f64()
                .and_then(sas::sas_time)
                .map(|time| Value::String(time.format("%H:%M:%S%.f").to_string()))
                .unwrap_or(Value::Null),
            (value, _) => value,
        }
    }
}

impl GroupArray for SasDialect {
    fn group_array(&self, expr: &str) -> String {
        format!("CATX(',', {})", expr)
    }
}

impl OrderDirection for SasDialect {
    fn order(&self, expr: &str, direction: Direction) -> String {
        match direction {
            Direction::Asc => format!("CASE WHEN {expr} IS NULL THEN 1 ELSE 0 END, {expr} ASC"),
            Direction::Desc => format!("CASE WHEN {expr} IS NULL THEN 0 ELSE 1 END, {expr} DESC"),
        }
    }
}

fn default_literal(value: &Value) -> String {
    PostgresDialect.literal(value)
}

// === Registry ===

/// Dialects keyed by backend type, e.g. `sql/sqlite`
#[derive(Clone, Default)]
pub struct DialectRegistry {
    dialects: BTreeMap<String, Arc<dyn Dialect>>,
}

impl DialectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in dialect
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        init(&mut registry);
        registry
    }

    pub fn register(&mut self, kind: &str, dialect: Arc<dyn Dialect>) {
        self.dialects.insert(kind.to_string(), dialect);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn Dialect>, BackendError> {
        self.dialects
            .get(kind)
            .cloned()
            .ok_or_else(|| BackendError::UnknownDialect(kind.to_string()))
    }

    /// Dialect for a backend; plain `sql` backends are resolved by the DSN
    /// scheme
    pub fn for_backend(&self, kind: &str, dsn: &str) -> Result<Arc<dyn Dialect>, BackendError> {
        if kind != "sql" {
            return self.get(kind);
        }
        let scheme = dsn.split("://").next().unwrap_or_default();
        let driver = scheme.split('+').next().unwrap_or_default();
        self.get(&format!("sql/{}", driver))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.dialects.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.dialects.keys()).finish()
    }
}

/// Register the built-in dialects
pub fn init(registry: &mut DialectRegistry) {
    registry.register("sql/sqlite", Arc::new(SqliteDialect));
    registry.register("sql/postgresql", Arc::new(PostgresDialect));
    registry.register("sql/mysql", Arc::new(MysqlDialect));
    registry.register("sql/sas", Arc::new(SasDialect));
}
