//! Spinta
//!
//! Umbrella crate over the workspace: manifests, the Spyna expression
//! language, backends, the keymap and upgrade scripts.

pub use spinta_backends as backends;
pub use spinta_core as core;
pub use spinta_keymap as keymap;
pub use spinta_manifest as manifest;
pub use spinta_scripts as scripts;
pub use spinta_spyna as spyna;

pub use spinta_core::{Access, Config, Context, ErrorCode, ErrorReport, Level};
pub use spinta_manifest::{load_manifest_str, Manifest};
