//! Keymap
//!
//! Durable mapping between surrogate keys (UUID v4 strings) and natural
//! keys per model, with redirects between surrogate keys and a change
//! cursor per model. Backed by SQLite; the schema version is tracked in a
//! `_migrations` ledger.

mod error;
pub mod schema;
mod sql;
mod value;

pub use error::KeymapError;
pub use sql::{open_connection, KeyMap, KeymapSyncData, SqlKeyMap, SyncStats};
pub use value::{encode_value, is_valid, KeyValue};
