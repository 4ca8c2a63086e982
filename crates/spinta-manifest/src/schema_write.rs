//! Schema writes: `POST /{dataset}/:schema`
//!
//! A request carries a CSV manifest describing exactly one dataset. It is
//! validated, merged into a copy of the current manifest, diffed against
//! the stored rows by node id and written to the internal table in one
//! transaction. A relational backend gets the matching table migrations
//! inside the same transaction window; if they fail nothing is kept.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::check::check;
use crate::dtype::DataType;
use crate::error::ManifestError;
use crate::internal::{insert_rows, read_internal, to_internal, Dim, InternalRow, ManifestStore};
use crate::link::link;
use crate::load::{load_nodes, LoadOptions};
use crate::manifest::{Manifest, Property};
use crate::render::{dataset_to_tabular, RenderOptions};
use crate::schema::Schema;
use crate::tabular::read_tabular;

pub const SCHEMA_CONTENT_TYPE: &str = "text/csv";

const DATASET_PATH: &str = r"^[a-z0-9_]+(/[a-z0-9_]+)*$";
const MODEL_NAME: &str = r"^[A-Z][A-Za-z0-9]*$";
const PROPERTY_NAME: &str = r"^[a-z_][a-z0-9_]*(@[a-z]{2})?$";

#[derive(Debug, Clone, Copy)]
pub struct SchemaWriteRequest<'a> {
    /// Dataset path from the URL
    pub dataset: &'a str,
    pub content_type: &'a str,
    pub body: &'a [u8],
}

/// A node touched by a schema write
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub id: String,
    pub dim: Dim,
    pub name: String,
    pub path: String,
    pub depth: i64,
}

impl SchemaNode {
    fn of(row: &InternalRow) -> Self {
        Self {
            id: row.id.clone(),
            dim: row.dim,
            name: row.name.clone(),
            path: row.path.clone(),
            depth: row.depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    Create(SchemaNode),
    Update(SchemaNode),
    Delete(SchemaNode),
    Rename { node: SchemaNode, from: String },
}

impl SchemaOperation {
    pub fn node(&self) -> &SchemaNode {
        match self {
            SchemaOperation::Create(node)
            | SchemaOperation::Update(node)
            | SchemaOperation::Delete(node)
            | SchemaOperation::Rename { node, .. } => node,
        }
    }
}

/// Table change a relational backend applies for a schema write. Tables
/// are named after absolute model names, columns after properties.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaMigration {
    CreateTable {
        table: String,
        columns: Vec<(String, DataType)>,
    },
    RenameTable {
        from: String,
        to: String,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: String,
        dtype: DataType,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
}

/// Applies table migrations; implemented by relational backends
pub trait SchemaMigrator {
    fn migrate(&self, migrations: &[SchemaMigration]) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

#[derive(Debug, Clone, Default)]
pub struct SchemaWriteResult {
    pub operations: Vec<SchemaOperation>,
    pub migrations: Vec<SchemaMigration>,
}

fn is_match(pattern: &str, text: &str) -> Result<bool, ManifestError> {
    let regex = Regex::new(pattern).map_err(|e| ManifestError::tabular(0, e.to_string()))?;
    Ok(regex.is_match(text))
}

fn is_csv(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(SCHEMA_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Request checks that need no parsing, in the order they are reported
pub fn validate_request(request: &SchemaWriteRequest<'_>, max_size: u64) -> Result<(), ManifestError> {
    if !is_match(DATASET_PATH, request.dataset)? {
        return Err(ManifestError::InvalidSchemaUrlPath(request.dataset.to_string()));
    }
    if !is_csv(request.content_type) {
        return Err(ManifestError::UnknownContentType(request.content_type.to_string()));
    }
    if request.body.is_empty() {
        return Err(ManifestError::ModifySchemaRequiresFile);
    }
    let size = request.body.len() as u64;
    if size > max_size {
        return Err(ManifestError::FileSizeTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(())
}

/// Checks on the parsed body: one dataset matching the URL, ids on every
/// structural row, well formed names
pub fn validate_schemas(dataset: &str, schemas: &[(usize, Schema)]) -> Result<(), ManifestError> {
    let datasets: Vec<&str> = schemas
        .iter()
        .filter_map(|(_, s)| match s {
            Schema::Dataset(d) => Some(d.name.as_str()),
            _ => None,
        })
        .collect();
    match datasets.as_slice() {
        [] if schemas.is_empty() => return Err(ManifestError::ModifySchemaRequiresFile),
        [name] if *name != dataset => {
            return Err(ManifestError::DatasetNameMissmatch {
                expected: dataset.to_string(),
                given: name.to_string(),
            })
        }
        [_] => {}
        other => {
            return Err(ManifestError::ModifyOneDatasetSchema { count: other.len() })
        }
    }

    for (eid, schema) in schemas {
        let (dim, id) = match schema {
            Schema::Global(_) => continue,
            Schema::Dataset(s) => ("dataset", &s.id),
            Schema::Resource(s) => ("resource", &s.id),
            Schema::Base(s) => ("base", &s.id),
            Schema::Model(s) => ("model", &s.id),
        };
        require_id(*eid, dim, schema.name(), id)?;

        if let Schema::Model(model) = schema {
            let basename = model.name.rsplit('/').next().unwrap_or(&model.name);
            if !is_match(MODEL_NAME, basename)? {
                return Err(ManifestError::InvalidName {
                    kind: "model",
                    name: basename.to_string(),
                });
            }
            for property in &model.properties {
                require_id(property.eid, "property", &property.name, &property.id)?;
                if !is_match(PROPERTY_NAME, &property.name)? {
                    return Err(ManifestError::InvalidName {
                        kind: "property",
                        name: property.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn require_id(row: usize, dim: &'static str, name: &str, id: &Option<String>) -> Result<(), ManifestError> {
    let valid = id
        .as_deref()
        .map(|id| uuid::Uuid::parse_str(id).is_ok())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ManifestError::DatasetSchemaRequiresIds {
            row,
            dim,
            name: name.to_string(),
        })
    }
}

/// Structural diff of one dataset by node id. Deletions come first,
/// deepest nodes first; then renames and updates; creations last,
/// parents before children.
pub fn diff_rows(old: &[InternalRow], new: &[InternalRow]) -> Vec<SchemaOperation> {
    let structural = |rows: &[InternalRow]| -> Vec<InternalRow> {
        rows.iter().filter(|r| r.dim.is_structural()).cloned().collect()
    };
    let old = structural(old);
    let new = structural(new);
    let old_by_id: HashMap<&str, &InternalRow> = old.iter().map(|r| (r.id.as_str(), r)).collect();
    let new_by_id: HashMap<&str, &InternalRow> = new.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut deletes: Vec<SchemaNode> = old
        .iter()
        .filter(|r| !new_by_id.contains_key(r.id.as_str()))
        .map(SchemaNode::of)
        .collect();
    deletes.sort_by_key(|n| std::cmp::Reverse(n.depth));

    let mut renames = Vec::new();
    let mut updates = Vec::new();
    let mut creates = Vec::new();
    for row in &new {
        match old_by_id.get(row.id.as_str()) {
            None => creates.push(SchemaNode::of(row)),
            Some(before) => {
                if before.name != row.name {
                    renames.push(SchemaOperation::Rename {
                        node: SchemaNode::of(row),
                        from: before.name.clone(),
                    });
                }
                let changed = before.cells != row.cells
                    || before.prepare != row.prepare
                    || before.parent_id != row.parent_id;
                if changed {
                    updates.push(SchemaOperation::Update(SchemaNode::of(row)));
                }
            }
        }
    }
    renames.sort_by_key(|op| op.node().depth);
    creates.sort_by_key(|n| n.depth);

    deletes
        .into_iter()
        .map(SchemaOperation::Delete)
        .chain(renames)
        .chain(updates)
        .chain(creates.into_iter().map(SchemaOperation::Create))
        .collect()
}

/// Table migrations for diffed operations
pub fn plan_migrations(old: &Manifest, new: &Manifest, operations: &[SchemaOperation]) -> Vec<SchemaMigration> {
    let old_models: HashMap<&str, &str> = old
        .get_models()
        .map(|(_, m)| (m.key.id.as_str(), m.name.as_str()))
        .collect();
    let new_models: HashMap<&str, crate::manifest::ModelId> =
        new.get_models().map(|(id, m)| (m.key.id.as_str(), id)).collect();
    let old_properties: HashMap<&str, &Property> = old
        .get_models()
        .flat_map(|(_, m)| m.properties.iter().map(|p| old.property(*p)))
        .map(|p| (p.key.id.as_str(), p))
        .collect();
    let new_properties: HashMap<&str, &Property> = new
        .get_models()
        .flat_map(|(_, m)| m.properties.iter().map(|p| new.property(*p)))
        .map(|p| (p.key.id.as_str(), p))
        .collect();

    let mut created_tables = Vec::new();
    let mut dropped_tables = Vec::new();
    for op in operations {
        match op {
            SchemaOperation::Create(node) if node.dim == Dim::Model => created_tables.push(node.id.clone()),
            SchemaOperation::Delete(node) if node.dim == Dim::Model => dropped_tables.push(node.id.clone()),
            _ => {}
        }
    }

    let mut migrations = Vec::new();
    for op in operations {
        let node = op.node();
        match (op, node.dim) {
            (SchemaOperation::Delete(_), Dim::Model) => {
                if let Some(name) = old_models.get(node.id.as_str()) {
                    migrations.push(SchemaMigration::DropTable {
                        table: name.to_string(),
                    });
                }
            }
            (SchemaOperation::Delete(_), Dim::Property) => {
                let Some(property) = old_properties.get(node.id.as_str()) else {
                    continue;
                };
                let model = &old.model(property.model).key.id;
                if dropped_tables.contains(model) {
                    continue;
                }
                migrations.push(SchemaMigration::DropColumn {
                    table: old.model(property.model).name.clone(),
                    column: property.name.clone(),
                });
            }
            (SchemaOperation::Rename { .. }, Dim::Model) => {
                let from = old_models.get(node.id.as_str()).map(|n| n.to_string());
                let to = new_models.get(node.id.as_str()).map(|id| new.model(*id).name.clone());
                if let (Some(from), Some(to)) = (from, to) {
                    migrations.push(SchemaMigration::RenameTable { from, to });
                }
            }
            (SchemaOperation::Rename { from, .. }, Dim::Property) => {
                if let Some(property) = new_properties.get(node.id.as_str()) {
                    migrations.push(SchemaMigration::RenameColumn {
                        table: new.model(property.model).name.clone(),
                        from: from.clone(),
                        to: property.name.clone(),
                    });
                }
            }
            (SchemaOperation::Create(_), Dim::Model) => {
                if let Some(id) = new_models.get(node.id.as_str()) {
                    let model = new.model(*id);
                    let columns = model
                        .properties
                        .iter()
                        .map(|p| new.property(*p))
                        .filter(|p| !p.synthetic)
                        .map(|p| (p.name.clone(), p.dtype.kind))
                        .collect();
                    migrations.push(SchemaMigration::CreateTable {
                        table: model.name.clone(),
                        columns,
                    });
                }
            }
            (SchemaOperation::Create(_), Dim::Property) => {
                let Some(property) = new_properties.get(node.id.as_str()) else {
                    continue;
                };
                let model = &new.model(property.model).key.id;
                if created_tables.contains(model) {
                    continue;
                }
                migrations.push(SchemaMigration::AddColumn {
                    table: new.model(property.model).name.clone(),
                    column: property.name.clone(),
                    dtype: property.dtype.kind,
                });
            }
            _ => {}
        }
    }
    migrations
}

impl ManifestStore {
    /// Validate, diff and persist a schema write for one dataset
    pub fn write_schema(
        &self,
        request: &SchemaWriteRequest<'_>,
        max_size: u64,
        migrator: Option<&dyn SchemaMigrator>,
    ) -> Result<SchemaWriteResult, ManifestError> {
        validate_request(request, max_size)?;
        let schemas = read_tabular(request.body)?;
        validate_schemas(request.dataset, &schemas)?;

        // one writer at a time; readers keep their snapshot until the swap
        let mut slot = self.manifest.write().unwrap_or_else(|e| e.into_inner());
        let old: Arc<Manifest> = Arc::clone(&slot);

        let mut new = Manifest::clone(&old);
        load_nodes(&mut new, schemas, &LoadOptions::default())?;
        link(&mut new)?;
        check(&new)?;

        let dataset = new
            .get_dataset(request.dataset)
            .ok_or_else(|| ManifestError::ModelNotFound(request.dataset.to_string()))?;
        let options = RenderOptions {
            all_ids: true,
            ..RenderOptions::default()
        };
        let new_rows = to_internal(&dataset_to_tabular(&new, dataset, &options))?;

        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let stored = read_internal(&conn)?;
        let old_root = stored
            .iter()
            .find(|r| r.dim == Dim::Dataset && r.name == request.dataset)
            .map(|r| r.mpath.clone());
        let old_rows: Vec<InternalRow> = match &old_root {
            Some(root) => stored
                .iter()
                .filter(|r| &r.mpath == root || r.mpath.starts_with(&format!("{}/", root)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let operations = diff_rows(&old_rows, &new_rows);
        let migrations = plan_migrations(&old, &new, &operations);

        let tx = conn.transaction()?;
        if let Some(root) = &old_root {
            tx.execute(
                "DELETE FROM _manifest WHERE mpath = ?1 OR mpath LIKE ?1 || '/%'",
                [root],
            )?;
        }
        insert_rows(&tx, &new_rows)?;
        if let Some(migrator) = migrator {
            if !migrations.is_empty() {
                if let Err(e) = migrator.migrate(&migrations) {
                    warn!(dataset = request.dataset, error = %e, "schema migration failed");
                    return Err(ManifestError::Migration(e.to_string()));
                }
            }
        }
        tx.commit()?;

        info!(
            dataset = request.dataset,
            operations = operations.len(),
            migrations = migrations.len(),
            "schema written"
        );
        *slot = Arc::new(new);
        Ok(SchemaWriteResult {
            operations,
            migrations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DS: &str = "11111111-1111-4111-8111-111111111111";
    const COUNTRY: &str = "22222222-2222-4222-8222-222222222222";
    const ID: &str = "33333333-3333-4333-8333-333333333333";
    const NAME: &str = "44444444-4444-4444-8444-444444444444";

    fn body(model: &str, name_prop: &str) -> String {
        format!(
            "id,dataset,model,property,type,ref\n\
             {DS},api/schema/insert,,,,\n\
             {COUNTRY},,{model},,,id\n\
             {ID},,,id,integer,\n\
             {NAME},,,{name_prop},string,\n"
        )
    }

    fn request<'a>(dataset: &'a str, body: &'a str) -> SchemaWriteRequest<'a> {
        SchemaWriteRequest {
            dataset,
            content_type: "text/csv; charset=utf-8",
            body: body.as_bytes(),
        }
    }

    #[test]
    fn test_request_validation_order() {
        let csv = body("Country", "name");
        let err = validate_request(&request("Api/Bad", &csv), 1024).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidSchemaUrlPath(_)));

        let mut req = request("api/schema/insert", &csv);
        req.content_type = "application/json";
        assert!(matches!(
            validate_request(&req, 1024),
            Err(ManifestError::UnknownContentType(_))
        ));

        assert!(matches!(
            validate_request(&request("api/schema/insert", ""), 1024),
            Err(ManifestError::ModifySchemaRequiresFile)
        ));
        assert!(matches!(
            validate_request(&request("api/schema/insert", &csv), 10),
            Err(ManifestError::FileSizeTooLarge { max: 10, .. })
        ));
    }

    #[test]
    fn test_dataset_name_and_ids() {
        let store = ManifestStore::open_in_memory().unwrap();
        let csv = body("Country", "name");
        let err = store
            .write_schema(&request("api/schema/other", &csv), 1 << 20, None)
            .unwrap_err();
        assert!(matches!(err, ManifestError::DatasetNameMissmatch { .. }));

        let without_id = csv.replace(NAME, "");
        let err = store
            .write_schema(&request("api/schema/insert", &without_id), 1 << 20, None)
            .unwrap_err();
        assert!(matches!(
            err,
            ManifestError::DatasetSchemaRequiresIds { dim: "property", row: 5, .. }
        ));

        let two = format!("{csv}{},other/ds,,,,\n", "55555555-5555-4555-8555-555555555555");
        let err = store
            .write_schema(&request("api/schema/insert", &two), 1 << 20, None)
            .unwrap_err();
        assert!(matches!(err, ManifestError::ModifyOneDatasetSchema { count: 2 }));
    }

    #[test]
    fn test_invalid_names() {
        let store = ManifestStore::open_in_memory().unwrap();
        let err = store
            .write_schema(&request("api/schema/insert", &body("country", "name")), 1 << 20, None)
            .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName { kind: "model", .. }));
        let err = store
            .write_schema(&request("api/schema/insert", &body("Country", "Name")), 1 << 20, None)
            .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName { kind: "property", .. }));
    }

    #[test]
    fn test_create_then_rename() {
        let store = ManifestStore::open_in_memory().unwrap();
        let created = store
            .write_schema(&request("api/schema/insert", &body("Country", "name")), 1 << 20, None)
            .unwrap();
        assert_eq!(created.operations.len(), 4);
        assert!(created
            .operations
            .iter()
            .all(|op| matches!(op, SchemaOperation::Create(_))));
        assert_eq!(
            created.migrations,
            vec![SchemaMigration::CreateTable {
                table: "api/schema/insert/Country".into(),
                columns: vec![
                    ("id".into(), DataType::Integer),
                    ("name".into(), DataType::String),
                ],
            }]
        );

        let renamed = store
            .write_schema(&request("api/schema/insert", &body("State", "title")), 1 << 20, None)
            .unwrap();
        assert_eq!(
            renamed.migrations,
            vec![
                SchemaMigration::RenameTable {
                    from: "api/schema/insert/Country".into(),
                    to: "api/schema/insert/State".into(),
                },
                SchemaMigration::RenameColumn {
                    table: "api/schema/insert/State".into(),
                    from: "name".into(),
                    to: "title".into(),
                },
            ]
        );
        assert!(store.manifest().has_model("api/schema/insert/State"));
        assert!(!store.manifest().has_model("api/schema/insert/Country"));
        let rows = store.rows().unwrap();
        assert_eq!(rows.len(), 4);
    }

    struct Failing;

    impl SchemaMigrator for Failing {
        fn migrate(&self, _: &[SchemaMigration]) -> Result<(), Box<dyn StdError + Send + Sync>> {
            Err("table is locked".into())
        }
    }

    #[test]
    fn test_failed_migration_keeps_previous_state() {
        let store = ManifestStore::open_in_memory().unwrap();
        let err = store
            .write_schema(
                &request("api/schema/insert", &body("Country", "name")),
                1 << 20,
                Some(&Failing),
            )
            .unwrap_err();
        assert!(matches!(err, ManifestError::Migration(_)));
        assert!(store.rows().unwrap().is_empty());
        assert!(store.manifest().is_empty());
    }
}
