//! Script contract

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use spinta_core::Context;

use crate::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptType {
    Upgrade,
    Admin,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Upgrade => "upgrade",
            ScriptType::Admin => "admin",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upgrade" => Ok(ScriptType::Upgrade),
            "admin" => Ok(ScriptType::Admin),
            other => Err(format!("unknown script type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptTarget {
    SqlalchemyKeymap,
    FileSystem,
    Auth,
    Backend,
}

impl ScriptTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptTarget::SqlalchemyKeymap => "sqlalchemy_keymap",
            ScriptTarget::FileSystem => "file_system",
            ScriptTarget::Auth => "auth",
            ScriptTarget::Backend => "backend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptTag {
    BugFix,
    Migration,
    DbMigration,
}

impl ScriptTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptTag::BugFix => "bug_fix",
            ScriptTag::Migration => "migration",
            ScriptTag::DbMigration => "db_migration",
        }
    }
}

/// A predecessor: a name of the same type, or a script of another type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Name(&'static str),
    Typed(ScriptType, &'static str),
}

impl Requirement {
    pub fn resolve(&self, own_type: ScriptType) -> ScriptKey {
        match self {
            Requirement::Name(name) => ScriptKey::new(own_type, *name),
            Requirement::Typed(script_type, name) => ScriptKey::new(*script_type, *name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptKey {
    pub script_type: ScriptType,
    pub name: String,
}

impl ScriptKey {
    pub fn new(script_type: ScriptType, name: impl Into<String>) -> Self {
        Self {
            script_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for ScriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.script_type, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptStatus {
    /// `check` found nothing to do
    Passed,
    Required,
    Forced,
    /// A predecessor has not passed
    Skipped,
}

impl ScriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStatus::Passed => "PASSED",
            ScriptStatus::Required => "REQUIRED",
            ScriptStatus::Forced => "FORCED",
            ScriptStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra script arguments from the command line
#[derive(Debug, Clone, Default)]
pub struct ScriptArgs {
    /// Alternative input location, e.g. for `model_limit`
    pub input: Option<PathBuf>,
}

pub trait Script: Send + Sync {
    fn name(&self) -> &'static str;

    fn script_type(&self) -> ScriptType;

    fn required(&self) -> Vec<Requirement> {
        Vec::new()
    }

    fn targets(&self) -> Vec<ScriptTarget> {
        Vec::new()
    }

    fn tags(&self) -> Vec<ScriptTag> {
        Vec::new()
    }

    /// Whether the script has work to do; never changes state
    fn check(&self, ctx: &Context, args: &ScriptArgs) -> Result<bool, ScriptError>;

    fn run(&self, ctx: &Context, args: &ScriptArgs, destructive: bool) -> Result<(), ScriptError>;

    fn key(&self) -> ScriptKey {
        ScriptKey::new(self.script_type(), self.name())
    }
}
