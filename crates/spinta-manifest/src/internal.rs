//! Internal SQL form of the manifest
//!
//! Every node and meta row is one row of the `_manifest` table. Rows are
//! kept in document order (`rowid`); `parent_id`, `depth`, `path` and
//! `mpath` describe the hierarchy. The table is produced from rendered
//! tabular rows and read back through the same row reader, so both forms
//! share one set of parsing rules.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::{params, Connection, Transaction};
use serde_json::Value;
use spinta_spyna::{parse as parse_expr, unparse, Expr};
use tracing::{debug, info};

use crate::error::ManifestError;
use crate::link::link;
use crate::load::{load_nodes, LoadOptions};
use crate::manifest::Manifest;
use crate::render::{datasets_to_tabular, RenderOptions};
use crate::tabular::{read_rows, Column, TabularRow};

pub const MANIFEST_TABLE: &str = "_manifest";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS _manifest (
    id TEXT PRIMARY KEY,
    parent_id TEXT,
    depth INTEGER NOT NULL,
    path TEXT NOT NULL,
    mpath TEXT NOT NULL,
    dim TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    type TEXT NOT NULL DEFAULT '',
    ref TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT '',
    source_type TEXT NOT NULL DEFAULT '',
    prepare TEXT,
    origin TEXT NOT NULL DEFAULT '',
    count TEXT NOT NULL DEFAULT '',
    level TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT '',
    visibility TEXT NOT NULL DEFAULT '',
    access TEXT NOT NULL DEFAULT '',
    uri TEXT NOT NULL DEFAULT '',
    eli TEXT NOT NULL DEFAULT '',
    title TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_manifest_parent ON _manifest(parent_id);
CREATE INDEX IF NOT EXISTS idx_manifest_mpath ON _manifest(mpath);
"#;

/// Node kind of an internal row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Dataset,
    Resource,
    Base,
    Model,
    Property,
    Enum,
    EnumItem,
    Param,
    ParamItem,
    Lang,
    Prefix,
    Comment,
    Ns,
    Unique,
}

impl Dim {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dim::Dataset => "dataset",
            Dim::Resource => "resource",
            Dim::Base => "base",
            Dim::Model => "model",
            Dim::Property => "property",
            Dim::Enum => "enum",
            Dim::EnumItem => "enum.item",
            Dim::Param => "param",
            Dim::ParamItem => "param.item",
            Dim::Lang => "lang",
            Dim::Prefix => "prefix",
            Dim::Comment => "comment",
            Dim::Ns => "ns",
            Dim::Unique => "unique",
        }
    }

    pub fn is_structural(&self) -> bool {
        self.column().is_some()
    }

    /// Tabular column holding the node name
    fn column(&self) -> Option<Column> {
        match self {
            Dim::Dataset => Some(Column::Dataset),
            Dim::Resource => Some(Column::Resource),
            Dim::Base => Some(Column::Base),
            Dim::Model => Some(Column::Model),
            Dim::Property => Some(Column::Property),
            _ => None,
        }
    }

    fn item(&self) -> Option<Dim> {
        match self {
            Dim::Enum => Some(Dim::EnumItem),
            Dim::Param => Some(Dim::ParamItem),
            _ => None,
        }
    }
}

impl FromStr for Dim {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "dataset" => Dim::Dataset,
            "resource" => Dim::Resource,
            "base" => Dim::Base,
            "model" => Dim::Model,
            "property" => Dim::Property,
            "enum" => Dim::Enum,
            "enum.item" => Dim::EnumItem,
            "param" => Dim::Param,
            "param.item" => Dim::ParamItem,
            "lang" => Dim::Lang,
            "prefix" => Dim::Prefix,
            "comment" => Dim::Comment,
            "ns" => Dim::Ns,
            "unique" => Dim::Unique,
            other => {
                return Err(ManifestError::tabular(0, format!("unknown dim '{}'", other)))
            }
        })
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item fields that move from an enum or param row to its first item
const ITEM_COLUMNS: [Column; 5] = [
    Column::Source,
    Column::Prepare,
    Column::Access,
    Column::Title,
    Column::Description,
];

#[derive(Debug, Clone, PartialEq)]
pub struct InternalRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub depth: i64,
    pub path: String,
    pub mpath: String,
    pub dim: Dim,
    pub name: String,
    /// Remaining tabular cells, `prepare` excluded
    pub cells: TabularRow,
    pub prepare: Option<Value>,
}

#[derive(Debug, Clone)]
struct Scope {
    id: String,
    path: String,
    mpath: String,
    depth: i64,
}

impl Scope {
    fn of(row: &InternalRow) -> Self {
        Self {
            id: row.id.clone(),
            path: row.path.clone(),
            mpath: row.mpath.clone(),
            depth: row.depth,
        }
    }
}

#[derive(Default)]
struct Builder {
    rows: Vec<InternalRow>,
    dataset: Option<Scope>,
    resource: Option<Scope>,
    base: Option<Scope>,
    model: Option<Scope>,
    /// Innermost open node; meta rows attach here
    target: Option<Scope>,
    target_is_property: bool,
    /// Enum or param accepting continuation items
    open: Option<(Scope, Dim)>,
}

impl Builder {
    fn push(
        &mut self,
        parent: Option<&Scope>,
        dim: Dim,
        id: Option<&str>,
        name: &str,
        cells: TabularRow,
        eid: usize,
    ) -> Result<Scope, ManifestError> {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let prepare = match cells.get(Column::Prepare) {
            "" => None,
            text => Some(
                parse_expr(text)
                    .map_err(|source| ManifestError::Expression {
                        row: eid,
                        field: "prepare",
                        source,
                    })?
                    .to_json(),
            ),
        };
        let mut cells = cells;
        cells.set(Column::Prepare, "");
        cells.set(Column::Id, "");
        for column in Column::HIERARCHY {
            cells.set(column, "");
        }

        let row = match parent {
            Some(parent) => InternalRow {
                parent_id: Some(parent.id.clone()),
                depth: parent.depth + 1,
                path: format!("{}/{}", parent.path, name),
                mpath: format!("{}/{}", parent.mpath, id),
                id,
                dim,
                name: name.to_string(),
                cells,
                prepare,
            },
            None => InternalRow {
                parent_id: None,
                depth: 0,
                path: name.to_string(),
                mpath: id.clone(),
                id,
                dim,
                name: name.to_string(),
                cells,
                prepare,
            },
        };
        let scope = Scope::of(&row);
        self.rows.push(row);
        Ok(scope)
    }

    fn row(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        if row.is_blank() {
            if self.target_is_property {
                self.target = self.model.clone();
                self.target_is_property = false;
            }
            self.open = None;
            return Ok(());
        }

        let id = row.get(Column::Id);
        let id = (!id.is_empty()).then_some(id);
        match row.leftmost() {
            Some(Column::Dataset) => {
                let name = row.get(Column::Dataset);
                let scope = self.push(None, Dim::Dataset, id, name, row.clone(), eid)?;
                self.dataset = Some(scope.clone());
                self.resource = None;
                self.base = None;
                self.model = None;
                self.set_target(Some(scope), false);
            }
            Some(Column::Resource) => {
                let name = row.get(Column::Resource);
                self.model = None;
                if name == "/" {
                    self.resource = None;
                    let target = self.dataset.clone();
                    self.set_target(target, false);
                    return Ok(());
                }
                let parent = self.dataset.clone();
                let scope = self.push(parent.as_ref(), Dim::Resource, id, name, row.clone(), eid)?;
                self.resource = Some(scope.clone());
                self.set_target(Some(scope), false);
            }
            Some(Column::Base) => {
                let name = row.get(Column::Base);
                self.model = None;
                if name == "/" {
                    self.base = None;
                    let target = self.resource.clone().or_else(|| self.dataset.clone());
                    self.set_target(target, false);
                    return Ok(());
                }
                let parent = self.resource.clone().or_else(|| self.dataset.clone());
                let scope = self.push(parent.as_ref(), Dim::Base, id, name, row.clone(), eid)?;
                self.base = Some(scope.clone());
                self.set_target(Some(scope), false);
            }
            Some(Column::Model) => {
                let name = row.get(Column::Model);
                let parent = self
                    .base
                    .clone()
                    .or_else(|| self.resource.clone())
                    .or_else(|| self.dataset.clone());
                let scope = self.push(parent.as_ref(), Dim::Model, id, name, row.clone(), eid)?;
                self.model = Some(scope.clone());
                self.set_target(Some(scope), false);
            }
            Some(Column::Property) => {
                let name = row.get(Column::Property);
                let parent = self.model.clone().ok_or_else(|| {
                    ManifestError::tabular(eid, format!("property '{}' is declared outside of a model", name))
                })?;
                let scope = self.push(Some(&parent), Dim::Property, id, name, row.clone(), eid)?;
                self.set_target(Some(scope), true);
            }
            _ if !row.get(Column::Type).is_empty() => self.meta(eid, id, row)?,
            _ => {
                let (parent, dim) = self.open.clone().ok_or_else(|| {
                    ManifestError::tabular(eid, "continuation row without an open enum or param")
                })?;
                let item = dim.item().unwrap_or(dim);
                let name = row.get(Column::Source).to_string();
                self.push(Some(&parent), item, id, &name, row.clone(), eid)?;
            }
        }
        Ok(())
    }

    fn set_target(&mut self, target: Option<Scope>, is_property: bool) {
        self.target = target;
        self.target_is_property = is_property;
        self.open = None;
    }

    fn meta(&mut self, eid: usize, id: Option<&str>, row: &TabularRow) -> Result<(), ManifestError> {
        let dim: Dim = row.get(Column::Type).parse().map_err(|_| {
            ManifestError::tabular(eid, format!("unknown row type '{}'", row.get(Column::Type)))
        })?;
        let parent = self.target.clone();
        let name = row.get(Column::Ref).to_string();
        self.open = None;

        match dim.item() {
            Some(item_dim) => {
                let mut head = row.clone();
                for column in ITEM_COLUMNS {
                    head.set(column, "");
                }
                let scope = self.push(parent.as_ref(), dim, id, &name, head, eid)?;
                let has_item = !row.get(Column::Source).is_empty() || !row.get(Column::Prepare).is_empty();
                if has_item {
                    let mut item = TabularRow::new();
                    for column in ITEM_COLUMNS {
                        item.set(column, row.get(column));
                    }
                    let item_name = row.get(Column::Source).to_string();
                    self.push(Some(&scope), item_dim, None, &item_name, item, eid)?;
                }
                self.open = Some((scope, dim));
            }
            None => {
                self.push(parent.as_ref(), dim, id, &name, row.clone(), eid)?;
            }
        }
        Ok(())
    }
}

/// Tabular rows to internal rows. Rows without an id get a generated one.
pub fn to_internal(rows: &[TabularRow]) -> Result<Vec<InternalRow>, ManifestError> {
    let mut builder = Builder::default();
    for (i, row) in rows.iter().enumerate() {
        builder.row(i + 2, row)?;
    }
    Ok(builder.rows)
}

/// Internal rows, in stored order, back to tabular rows
pub fn from_internal(rows: &[InternalRow]) -> Result<Vec<TabularRow>, ManifestError> {
    let dims: std::collections::HashMap<&str, Dim> =
        rows.iter().map(|r| (r.id.as_str(), r.dim)).collect();
    let mut out = Vec::with_capacity(rows.len());
    let mut base: Option<&str> = None;
    let mut property_model: Option<&str> = None;
    // enum or param row waiting for its first item
    let mut pending: Option<(&str, TabularRow)> = None;

    for row in rows {
        if let Some((head_id, mut head)) = pending.take() {
            let first_item = matches!(row.dim, Dim::EnumItem | Dim::ParamItem)
                && row.parent_id.as_deref() == Some(head_id);
            if first_item {
                for column in ITEM_COLUMNS {
                    head.set(column, item_cell(row, column));
                }
                out.push(head);
                continue;
            }
            out.push(head);
        }

        let mut cells = row.cells.clone();
        cells.set(Column::Id, &row.id);
        cells.set(Column::Prepare, prepare_cell(row)?);

        match row.dim {
            Dim::Dataset => base = None,
            Dim::Model => {
                let parent = row.parent_id.as_deref();
                let under_base = parent.and_then(|p| dims.get(p)) == Some(&Dim::Base);
                if base.is_some() && (!under_base || parent != base) {
                    out.push(TabularRow::new().with(Column::Base, "/"));
                    base = None;
                }
            }
            Dim::Base => base = Some(row.id.as_str()),
            _ => {}
        }

        if !row.dim.is_structural() && !matches!(row.dim, Dim::EnumItem | Dim::ParamItem) {
            // a model level meta row after its properties needs the property closed
            if property_model.is_some() && row.parent_id.as_deref() == property_model {
                out.push(TabularRow::new());
                property_model = None;
            }
        }

        match row.dim.column() {
            Some(column) => {
                cells.set(column, &row.name);
                property_model = match row.dim {
                    Dim::Property => row.parent_id.as_deref(),
                    _ => None,
                };
                out.push(cells);
            }
            None if row.dim.item().is_some() => {
                cells.set(Column::Type, row.dim.as_str());
                cells.set(Column::Ref, &row.name);
                pending = Some((row.id.as_str(), cells));
            }
            None if matches!(row.dim, Dim::EnumItem | Dim::ParamItem) => {
                cells.set(Column::Type, "");
                out.push(cells);
            }
            None => {
                cells.set(Column::Type, row.dim.as_str());
                out.push(cells);
            }
        }
    }
    if let Some((_, head)) = pending {
        out.push(head);
    }
    Ok(out)
}

fn item_cell(row: &InternalRow, column: Column) -> String {
    match column {
        Column::Prepare => row
            .prepare
            .as_ref()
            .and_then(|p| Expr::from_json(p).ok())
            .map(|e| unparse(&e))
            .unwrap_or_default(),
        other => row.cells.get(other).to_string(),
    }
}

fn prepare_cell(row: &InternalRow) -> Result<String, ManifestError> {
    match &row.prepare {
        Some(value) => {
            let expr = Expr::from_json(value).map_err(|source| ManifestError::Expression {
                row: 0,
                field: "prepare",
                source,
            })?;
            Ok(unparse(&expr))
        }
        None => Ok(String::new()),
    }
}

pub fn create_table(conn: &Connection) -> Result<(), ManifestError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub(crate) fn insert_rows(tx: &Transaction<'_>, rows: &[InternalRow]) -> Result<(), ManifestError> {
    let mut stmt = tx.prepare(
        "INSERT INTO _manifest (id, parent_id, depth, path, mpath, dim, name, type, ref, source,
             source_type, prepare, origin, count, level, status, visibility, access, uri, eli,
             title, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
             ?18, ?19, ?20, ?21, ?22)",
    )?;
    for row in rows {
        let prepare = row.prepare.as_ref().map(|p| p.to_string());
        let c = |column: Column| row.cells.get(column).to_string();
        stmt.execute(params![
            row.id,
            row.parent_id,
            row.depth,
            row.path,
            row.mpath,
            row.dim.as_str(),
            row.name,
            c(Column::Type),
            c(Column::Ref),
            c(Column::Source),
            c(Column::SourceType),
            prepare,
            c(Column::Origin),
            c(Column::Count),
            c(Column::Level),
            c(Column::Status),
            c(Column::Visibility),
            c(Column::Access),
            c(Column::Uri),
            c(Column::Eli),
            c(Column::Title),
            c(Column::Description),
        ])?;
    }
    Ok(())
}

pub fn read_internal(conn: &Connection) -> Result<Vec<InternalRow>, ManifestError> {
    let mut stmt = conn.prepare(
        "SELECT id, parent_id, depth, path, mpath, dim, name, type, ref, source, source_type,
                prepare, origin, count, level, status, visibility, access, uri, eli, title,
                description
         FROM _manifest ORDER BY rowid",
    )?;
    let raw = stmt
        .query_map([], |r| {
            let mut cells = TabularRow::new();
            let text_columns: [(usize, Column); 14] = [
                (7, Column::Type),
                (8, Column::Ref),
                (9, Column::Source),
                (10, Column::SourceType),
                (12, Column::Origin),
                (13, Column::Count),
                (14, Column::Level),
                (15, Column::Status),
                (16, Column::Visibility),
                (17, Column::Access),
                (18, Column::Uri),
                (19, Column::Eli),
                (20, Column::Title),
                (21, Column::Description),
            ];
            for (index, column) in text_columns {
                cells.set(column, r.get::<_, String>(index)?);
            }
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                cells,
                r.get::<_, Option<String>>(11)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, parent_id, depth, path, mpath, dim, name, cells, prepare)| {
            Ok(InternalRow {
                id,
                parent_id,
                depth,
                path,
                mpath,
                dim: dim.parse()?,
                name,
                cells,
                prepare: prepare.map(|p| serde_json::from_str(&p)).transpose()?,
            })
        })
        .collect()
}

/// Internal rows describing the whole manifest, every id included
pub fn manifest_to_internal(manifest: &Manifest) -> Result<Vec<InternalRow>, ManifestError> {
    let options = RenderOptions {
        all_ids: true,
        ..RenderOptions::default()
    };
    to_internal(&datasets_to_tabular(manifest, &options))
}

/// Load and link a manifest from internal rows
pub fn internal_to_manifest(rows: &[InternalRow]) -> Result<Manifest, ManifestError> {
    let mut manifest = Manifest::new();
    let schemas = read_rows(from_internal(rows)?)?;
    load_nodes(&mut manifest, schemas, &LoadOptions::default())?;
    link(&mut manifest)?;
    Ok(manifest)
}

/// Manifest persisted in the internal SQL form
///
/// Readers get a snapshot `Arc<Manifest>`; writers replace it wholesale
/// after the table has been rewritten.
pub struct ManifestStore {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) manifest: RwLock<Arc<Manifest>>,
}

impl ManifestStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, ManifestError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, ManifestError> {
        create_table(&conn)?;
        let rows = read_internal(&conn)?;
        let manifest = internal_to_manifest(&rows)?;
        debug!(rows = rows.len(), "internal manifest loaded");
        Ok(Self {
            conn: Mutex::new(conn),
            manifest: RwLock::new(Arc::new(manifest)),
        })
    }

    /// Current manifest snapshot
    pub fn manifest(&self) -> Arc<Manifest> {
        let guard = self.manifest.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn rows(&self) -> Result<Vec<InternalRow>, ManifestError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        read_internal(&conn)
    }

    /// Replace the stored manifest with `manifest`
    pub fn save(&self, manifest: Manifest) -> Result<(), ManifestError> {
        let rows = manifest_to_internal(&manifest)?;
        let mut slot = self.manifest.write().unwrap_or_else(|e| e.into_inner());
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM _manifest", [])?;
        insert_rows(&tx, &rows)?;
        tx.commit()?;
        info!(rows = rows.len(), "internal manifest saved");
        *slot = Arc::new(manifest);
        Ok(())
    }
}
