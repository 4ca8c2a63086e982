//! Typed configuration
//!
//! Loaded from a TOML file, then overridden from `SPINTA_*` environment
//! variables. Connection strings go through `${VAR}` expansion before a
//! backend sees them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

pub const DEFAULT_SYNC_TRANSACTION_SIZE: usize = 10_000;
pub const DEFAULT_LIMIT_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_SCHEMA_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding `clients/` and `limits.yml`
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Tabular manifest served by default
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Named backend connections
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,

    /// Backend used by models whose resource names none
    #[serde(default = "default_backend_name")]
    pub default_backend: String,

    #[serde(default)]
    pub keymap: KeymapConfig,

    /// Byte budget used by the `model_limit` admin script
    #[serde(default = "default_limit_bytes")]
    pub default_limit_bytes: u64,

    /// Largest accepted schema-write body
    #[serde(default = "default_max_schema_file_size")]
    pub max_schema_file_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type, e.g. `sql`, `sql/sqlite`, `sql/sas`
    #[serde(rename = "type")]
    pub kind: String,

    pub dsn: String,

    #[serde(default)]
    pub schema: Option<String>,

    /// Driver options passed through untouched
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeymapConfig {
    /// SQLite DSN of the keymap database; in-memory when empty
    #[serde(default)]
    pub dsn: String,

    /// Commit every N synchronized rows
    #[serde(default = "default_sync_transaction_size")]
    pub sync_transaction_size: usize,

    /// Report duplicate mappings as warnings instead of failing
    #[serde(default)]
    pub duplicate_warn_only: bool,

    /// Force the pre-redirect synchronize behaviour on or off; chosen from
    /// the migration ledger when unset
    #[serde(default)]
    pub legacy_sync: Option<bool>,
}

fn default_config_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_backend_name() -> String {
    "default".to_string()
}

fn default_limit_bytes() -> u64 {
    DEFAULT_LIMIT_BYTES
}

fn default_max_schema_file_size() -> u64 {
    DEFAULT_MAX_SCHEMA_FILE_SIZE
}

fn default_sync_transaction_size() -> usize {
    DEFAULT_SYNC_TRANSACTION_SIZE
}

impl Default for KeymapConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            sync_transaction_size: DEFAULT_SYNC_TRANSACTION_SIZE,
            duplicate_warn_only: false,
            legacy_sync: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            manifest: None,
            backends: BTreeMap::new(),
            default_backend: default_backend_name(),
            keymap: KeymapConfig::default(),
            default_limit_bytes: DEFAULT_LIMIT_BYTES,
            max_schema_file_size: DEFAULT_MAX_SCHEMA_FILE_SIZE,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Save config to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `SPINTA_CONFIG_PATH`, `SPINTA_MANIFEST` and `SPINTA_KEYMAP_DSN`
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SPINTA_CONFIG_PATH") {
            self.config_path = PathBuf::from(path);
        }
        if let Some(manifest) = lookup("SPINTA_MANIFEST") {
            self.manifest = Some(PathBuf::from(manifest));
        }
        if let Some(dsn) = lookup("SPINTA_KEYMAP_DSN") {
            self.keymap.dsn = dsn;
        }
    }

    pub fn clients_path(&self) -> PathBuf {
        self.config_path.join("clients")
    }

    pub fn limits_path(&self) -> PathBuf {
        self.config_path.join("limits.yml")
    }
}

impl BackendConfig {
    pub fn new(kind: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            dsn: dsn.into(),
            schema: None,
            options: BTreeMap::new(),
        }
    }

    /// DSN with environment variables expanded, and the schema appended
    /// as a query parameter for dialects that accept it there
    pub fn resolved_dsn(&self) -> String {
        let dsn = expand_env(&self.dsn);
        match (&self.schema, self.kind.as_str()) {
            (Some(schema), "sql/sas") if !dsn.contains("schema=") => {
                let separator = if dsn.contains('?') { '&' } else { '?' };
                format!("{}{}schema={}", dsn, separator, schema)
            }
            _ => dsn,
        }
    }
}

/// Expand `${VAR}` from the process environment. Unknown variables are
/// left as written.
pub fn expand_env(value: &str) -> String {
    expand_env_with(value, |key| std::env::var(key).ok())
}

pub(crate) fn expand_env_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match lookup(key) {
                    Some(found) => output.push_str(&found),
                    None => output.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.keymap.sync_transaction_size, 10_000);
        assert!(!config.keymap.duplicate_warn_only);
        assert_eq!(config.default_backend, "default");
    }

    #[test]
    fn test_backends_section() {
        let config = Config::from_toml(
            r#"
            [backends.default]
            type = "sql/sqlite"
            dsn = "sqlite:///data.db"

            [keymap]
            sync_transaction_size = 50
            duplicate_warn_only = true
            "#,
        )
        .unwrap();
        assert_eq!(config.backends["default"].kind, "sql/sqlite");
        assert_eq!(config.keymap.sync_transaction_size, 50);
        assert!(config.keymap.duplicate_warn_only);
    }

    #[test]
    fn test_expand_env() {
        let lookup = |key: &str| match key {
            "DB_USER" => Some("admin".to_string()),
            _ => None,
        };
        assert_eq!(
            expand_env_with("postgresql://${DB_USER}@${DB_HOST}/db", lookup),
            "postgresql://admin@${DB_HOST}/db"
        );
        assert_eq!(expand_env_with("plain", lookup), "plain");
        assert_eq!(expand_env_with("broken ${OPEN", lookup), "broken ${OPEN");
    }

    #[test]
    fn test_sas_schema_appended_to_dsn() {
        let mut backend = BackendConfig::new("sql/sas", "sas+jdbc://host:8591");
        backend.schema = Some("LIB".into());
        assert_eq!(backend.resolved_dsn(), "sas+jdbc://host:8591?schema=LIB");

        let mut sqlite = BackendConfig::new("sql/sqlite", "sqlite:///x.db");
        sqlite.schema = Some("main".into());
        assert_eq!(sqlite.resolved_dsn(), "sqlite:///x.db");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_from(|key| match key {
            "SPINTA_KEYMAP_DSN" => Some("sqlite:///keymap.db".into()),
            _ => None,
        });
        assert_eq!(config.keymap.dsn, "sqlite:///keymap.db");
        assert!(config.manifest.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.default_limit_bytes = 4096;
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.default_limit_bytes, 4096);
    }
}
