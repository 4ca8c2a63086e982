//! Backends
//!
//! The backend contract, SQL dialects and the SQLite adapter, plus the
//! readers built on them: `getall` through a manifest, database
//! inspection and personal data detection.

mod backend;
pub mod dialect;
mod error;
mod getall;
mod inspect;
mod pii;
mod query;
pub mod sas;
mod sqlite;
mod table;

pub use backend::{
    load_backend, Backend, Backends, ColumnHandle, ColumnInfo, ForeignKey, SqlDdl, TableHandle,
    Transaction,
};
pub use dialect::{Dialect, DialectRegistry, Direction};
pub use error::BackendError;
pub use getall::{getall, model_plan, GetAllOptions};
pub use inspect::{inspect, sql_dtype, InspectOptions};
pub use pii::{apply_pii, detect_pii, PiiDetector, PiiKind, PiiMatch, PII_PREFIX, PII_URI};
pub use query::{parse_sort, CompiledQuery, QueryPlan};
pub use sqlite::{sql_type, SqliteBackend, SqliteTransaction};
pub use table::{TableName, TableType};
