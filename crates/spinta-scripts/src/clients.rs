//! Client files
//!
//! Legacy clients live in flat `clients/<name>.yml` files where the
//! `client_id` is the client's name. Migrated clients are stored under
//! `clients/id/<xx>/<xx>/<rest>.yml`, split from a UUID `client_id`, with
//! `clients/helpers/keymap.yml` mapping names to ids.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spinta_core::Context;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ScriptError;
use crate::script::{Script, ScriptArgs, ScriptTarget, ScriptType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub client_name: String,
    #[serde(default)]
    pub client_secret_hash: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct LegacyClient {
    client_id: String,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    client_secret_hash: String,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// Migrated client files under one clients directory
#[derive(Debug, Clone)]
pub struct ClientStore {
    root: PathBuf,
}

impl ClientStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn id_dir(&self) -> PathBuf {
        self.root.join("id")
    }

    pub fn keymap_path(&self) -> PathBuf {
        self.root.join("helpers").join("keymap.yml")
    }

    /// `id/ab/cd/ef01-....yml` for `abcdef01-...`
    pub fn client_path(&self, client_id: &str) -> PathBuf {
        let split = |from: usize, to: usize| client_id.get(from..to).unwrap_or_default();
        self.id_dir()
            .join(split(0, 2))
            .join(split(2, 4))
            .join(format!("{}.yml", client_id.get(4..).unwrap_or_default()))
    }

    /// Flat `*.yml` files in the clients root
    pub fn legacy_files(&self) -> Result<Vec<PathBuf>, ScriptError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(ScriptError::io(&self.root))? {
            let path = entry.map_err(ScriptError::io(&self.root))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "yml") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Legacy files remain while the id folder or the keymap is missing or
    /// empty
    pub fn migration_required(&self) -> Result<bool, ScriptError> {
        if self.legacy_files()?.is_empty() {
            return Ok(false);
        }
        let id_empty = match fs::read_dir(self.id_dir()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        };
        let keymap_empty = match self.read_keymap() {
            Ok(keymap) => keymap.is_empty(),
            Err(_) => true,
        };
        Ok(id_empty || keymap_empty)
    }

    fn read_keymap(&self) -> Result<BTreeMap<String, String>, ScriptError> {
        let path = self.keymap_path();
        let content = fs::read_to_string(&path).map_err(ScriptError::io(&path))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Name to id mapping of migrated clients
    pub fn keymap(&self) -> Result<BTreeMap<String, String>, ScriptError> {
        self.ensure_migrated()?;
        self.read_keymap()
    }

    fn ensure_migrated(&self) -> Result<(), ScriptError> {
        if self.migration_required()? {
            return Err(ScriptError::ClientsMigrationRequired {
                path: self.root.clone(),
            });
        }
        if !self.keymap_path().is_file() {
            return Err(ScriptError::ClientsKeymapNotFound {
                path: self.keymap_path(),
            });
        }
        if !self.id_dir().is_dir() {
            return Err(ScriptError::ClientsIdFolderNotFound { path: self.id_dir() });
        }
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Result<Client, ScriptError> {
        let keymap = self.keymap()?;
        let id = keymap
            .get(name)
            .ok_or_else(|| ScriptError::ClientNotFound(name.to_string()))?;
        self.get_by_id(id)
    }

    pub fn get_by_id(&self, client_id: &str) -> Result<Client, ScriptError> {
        self.ensure_migrated()?;
        let path = self.client_path(client_id);
        if !path.is_file() {
            return Err(ScriptError::ClientNotFound(client_id.to_string()));
        }
        let content = fs::read_to_string(&path).map_err(ScriptError::io(&path))?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn write_client(&self, client: &Client) -> Result<PathBuf, ScriptError> {
        let path = self.client_path(&client.client_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ScriptError::io(parent))?;
        }
        fs::write(&path, serde_yaml::to_string(client)?).map_err(ScriptError::io(&path))?;
        Ok(path)
    }

    fn write_keymap(&self, keymap: &BTreeMap<String, String>) -> Result<(), ScriptError> {
        let path = self.keymap_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ScriptError::io(parent))?;
        }
        fs::write(&path, serde_yaml::to_string(keymap)?).map_err(ScriptError::io(&path))
    }

    /// Move every legacy client into the id layout; clients already in the
    /// keymap are rewritten only when `destructive`
    pub fn migrate(&self, destructive: bool) -> Result<usize, ScriptError> {
        let mut keymap = self.read_keymap().unwrap_or_default();
        let mut migrated = 0;
        for path in self.legacy_files()? {
            let content = fs::read_to_string(&path).map_err(ScriptError::io(&path))?;
            let legacy: LegacyClient = serde_yaml::from_str(&content).map_err(|e| ScriptError::InvalidClient {
                path: path.clone(),
                message: e.to_string(),
            })?;
            let name = legacy.client_name.clone().unwrap_or_else(|| legacy.client_id.clone());

            let existing = keymap.get(&name).cloned();
            if existing.is_some() && !destructive {
                debug!(client = %name, "client already migrated");
                continue;
            }
            let client_id = match existing {
                Some(id) => id,
                None if Uuid::parse_str(&legacy.client_id).is_ok() => legacy.client_id.clone(),
                None => Uuid::new_v4().to_string(),
            };

            let client = Client {
                client_id: client_id.clone(),
                client_name: name.clone(),
                client_secret_hash: legacy.client_secret_hash,
                scopes: legacy.scopes,
                extra: legacy.extra,
            };
            let written = self.write_client(&client)?;
            debug!(client = %name, path = %written.display(), "client migrated");
            keymap.insert(name, client_id);
            migrated += 1;
        }
        self.write_keymap(&keymap)?;
        Ok(migrated)
    }
}

pub struct ClientsScript;

impl ClientsScript {
    fn store(ctx: &Context) -> ClientStore {
        ClientStore::new(ctx.config().clients_path())
    }
}

impl Script for ClientsScript {
    fn name(&self) -> &'static str {
        "clients"
    }

    fn script_type(&self) -> ScriptType {
        ScriptType::Upgrade
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        vec![ScriptTarget::Auth, ScriptTarget::FileSystem]
    }

    fn check(&self, ctx: &Context, _args: &ScriptArgs) -> Result<bool, ScriptError> {
        Self::store(ctx).migration_required()
    }

    fn run(&self, ctx: &Context, _args: &ScriptArgs, destructive: bool) -> Result<(), ScriptError> {
        let store = Self::store(ctx);
        let migrated = store.migrate(destructive)?;
        info!(path = %store.root().display(), migrated, "clients migrated");
        Ok(())
    }
}
