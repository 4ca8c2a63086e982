//! Spinta Core - pieces shared by every other crate
//!
//! - [`ErrorCode`]: the closed set of stable error identifiers and the
//!   `{"errors": [...]}` envelope they are reported in
//! - [`Access`] and [`Level`]: ordinal node attributes
//! - [`Config`]: typed configuration loaded from TOML and the environment
//! - [`Context`]: scoped, lazily attached runtime resources

mod access;
mod config;
mod context;
mod error;

pub use access::{Access, Level};
pub use config::{expand_env, BackendConfig, Config, KeymapConfig};
pub use context::{Context, BACKENDS, KEYMAP, MANIFEST};
pub use error::{CoreError, ErrorCode, ErrorEntry, ErrorReport, Reportable};
