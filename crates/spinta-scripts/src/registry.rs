use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ScriptError;
use crate::script::{Script, ScriptKey, ScriptType};

/// Scripts by type and name; names are unique within a type
#[derive(Default, Clone)]
pub struct ScriptRegistry {
    scripts: BTreeMap<ScriptKey, Arc<dyn Script>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in script
    pub fn with_defaults() -> Result<Self, ScriptError> {
        let mut registry = Self::new();
        crate::init(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, script: Arc<dyn Script>) -> Result<(), ScriptError> {
        let key = script.key();
        if self.scripts.contains_key(&key) {
            return Err(ScriptError::DuplicateScript {
                script_type: key.script_type,
                name: key.name,
            });
        }
        self.scripts.insert(key, script);
        Ok(())
    }

    pub fn get(&self, key: &ScriptKey) -> Option<&Arc<dyn Script>> {
        self.scripts.get(key)
    }

    pub fn find(&self, script_type: ScriptType, name: &str) -> Result<&Arc<dyn Script>, ScriptError> {
        self.get(&ScriptKey::new(script_type, name))
            .ok_or_else(|| ScriptError::ScriptNotFound {
                script_type,
                name: name.to_string(),
            })
    }

    /// Scripts of one type, by name
    pub fn of_type(&self, script_type: ScriptType) -> impl Iterator<Item = &Arc<dyn Script>> {
        self.scripts
            .iter()
            .filter(move |(key, _)| key.script_type == script_type)
            .map(|(_, script)| script)
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.scripts.keys().map(|key| key.to_string()))
            .finish()
    }
}
