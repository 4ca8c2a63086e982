//! Scoped runtime context
//!
//! A context carries the configuration plus named resources (the manifest,
//! the keymap, backends). Resources are attached either as ready values or
//! as factories that run on first access. `fork()` opens a child scope:
//! lookups fall back to the parent, attachments stay in the child and are
//! released when the child is dropped.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::Config;
use crate::error::CoreError;

pub const MANIFEST: &str = "manifest";
pub const KEYMAP: &str = "keymap";
pub const BACKENDS: &str = "backends";

type Resource = Arc<dyn Any + Send + Sync>;
type Factory = Box<dyn FnOnce() -> Result<Resource, CoreError> + Send>;

#[derive(Default)]
struct Scope {
    values: HashMap<String, Resource>,
    factories: HashMap<String, Factory>,
}

pub struct Context {
    config: Arc<Config>,
    upgrade_mode: bool,
    scope: Mutex<Scope>,
    parent: Option<Arc<Context>>,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            upgrade_mode: false,
            scope: Mutex::new(Scope::default()),
            parent: None,
        }
    }

    /// Scripts of type `upgrade` run with this set; stores that carry a
    /// migration ledger refuse to open without it when migrations are
    /// missing.
    pub fn with_upgrade_mode(mut self, upgrade_mode: bool) -> Self {
        self.upgrade_mode = upgrade_mode;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn upgrade_mode(&self) -> bool {
        self.upgrade_mode
    }

    /// Child scope sharing configuration and parent resources
    pub fn fork(self: &Arc<Self>) -> Context {
        Context {
            config: Arc::clone(&self.config),
            upgrade_mode: self.upgrade_mode,
            scope: Mutex::new(Scope::default()),
            parent: Some(Arc::clone(self)),
        }
    }

    /// Attach a ready value under `name`, replacing anything attached in
    /// this scope
    pub fn attach_value<T>(&self, name: &str, value: T)
    where
        T: Any + Send + Sync,
    {
        let mut scope = self.lock();
        scope.factories.remove(name);
        scope.values.insert(name.to_string(), Arc::new(value));
    }

    /// Attach a factory; it runs at most once, on the first `get`
    pub fn attach<T, F>(&self, name: &str, factory: F)
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    {
        let mut scope = self.lock();
        scope.values.remove(name);
        scope.factories.insert(
            name.to_string(),
            Box::new(move || factory().map(|value| Arc::new(value) as Resource)),
        );
    }

    pub fn has(&self, name: &str) -> bool {
        {
            let scope = self.lock();
            if scope.values.contains_key(name) || scope.factories.contains_key(name) {
                return true;
            }
        }
        self.parent.as_ref().map(|p| p.has(name)).unwrap_or(false)
    }

    /// Resolve a resource, running its factory if needed
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, CoreError>
    where
        T: Any + Send + Sync,
    {
        let resource = self.resolve(name)?;
        resource.downcast::<T>().map_err(|_| CoreError::ResourceType {
            name: name.to_string(),
        })
    }

    /// Like `get`, but absent resources are `None` instead of an error
    pub fn try_get<T>(&self, name: &str) -> Result<Option<Arc<T>>, CoreError>
    where
        T: Any + Send + Sync,
    {
        if !self.has(name) {
            return Ok(None);
        }
        self.get(name).map(Some)
    }

    fn resolve(&self, name: &str) -> Result<Resource, CoreError> {
        let factory = {
            let mut scope = self.lock();
            if let Some(value) = scope.values.get(name) {
                return Ok(Arc::clone(value));
            }
            scope.factories.remove(name)
        };

        if let Some(factory) = factory {
            debug!(resource = name, "initializing context resource");
            let value = factory()?;
            self.lock().values.insert(name.to_string(), Arc::clone(&value));
            return Ok(value);
        }

        match &self.parent {
            Some(parent) => parent.resolve(name),
            None => Err(CoreError::ResourceNotFound(name.to_string())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Scope> {
        // A panic inside a factory leaves no partial state behind, so a
        // poisoned scope is still consistent.
        self.scope.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = self.lock();
        f.debug_struct("Context")
            .field("upgrade_mode", &self.upgrade_mode)
            .field("values", &scope.values.keys().collect::<Vec<_>>())
            .field("factories", &scope.factories.keys().collect::<Vec<_>>())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
