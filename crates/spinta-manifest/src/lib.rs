//! Manifest model
//!
//! A manifest is read from the tabular format (CSV or ASCII table) into
//! schema items, loaded into an arena graph, linked in a second pass and
//! checked. It can be rendered back to tabular rows and persisted in the
//! internal SQL form, where schema writes replace one dataset at a time.

pub mod check;
pub mod dtype;
pub mod error;
pub mod internal;
pub mod link;
pub mod load;
pub mod manifest;
pub mod names;
pub mod rename;
pub mod render;
pub mod schema;
pub mod schema_write;
pub mod tabular;

use std::path::Path;

pub use check::check;
pub use dtype::{DataType, Dtype};
pub use error::ManifestError;
pub use internal::{Dim, InternalRow, ManifestStore};
pub use link::link;
pub use load::{load_nodes, LoadOptions};
pub use manifest::{
    Base, BaseId, Dataset, DatasetId, Manifest, Model, ModelId, NodeKey, NodeRef, Property,
    PropertyId, Resource, ResourceId,
};
pub use names::format_names;
pub use rename::{rename_mapping, RenameMapping};
pub use render::{dataset_to_tabular, datasets_to_tabular, OrderBy, RenderOptions};
pub use schema::{RefSpec, Schema};
pub use schema_write::{
    SchemaMigration, SchemaMigrator, SchemaOperation, SchemaWriteRequest, SchemaWriteResult,
};
pub use tabular::{
    read_manifest_file, read_tabular, read_tabular_str, used_columns, write_ascii,
    write_tabular, write_tabular_string, Column, TabularRow,
};

/// Read, load and link a CSV manifest
pub fn load_manifest_str(csv: &str) -> Result<Manifest, ManifestError> {
    let mut manifest = Manifest::new();
    load_nodes(&mut manifest, read_tabular_str(csv)?, &LoadOptions::default())?;
    link(&mut manifest)?;
    Ok(manifest)
}

/// Read, load and link one or more manifest files, later files extending
/// or replacing earlier ones
pub fn load_manifest_files<P: AsRef<Path>>(
    paths: &[P],
    options: &LoadOptions,
) -> Result<Manifest, ManifestError> {
    let mut manifest = Manifest::new();
    for path in paths {
        load_nodes(&mut manifest, read_manifest_file(path.as_ref())?, options)?;
    }
    link(&mut manifest)?;
    Ok(manifest)
}
