//! Row reader: turns tabular rows into schema items
//!
//! Rows are processed in document order. The leftmost populated
//! hierarchical column decides the row kind; rows with no hierarchical
//! value are meta rows attached to the innermost open node.

use spinta_core::{Access, Level};
use spinta_spyna::{parse as parse_expr, Expr};

use super::{Column, TabularRow};
use crate::dtype::{DataType, Dtype};
use crate::error::ManifestError;
use crate::schema::{
    Attrs, BaseSchema, CommentDef, DatasetSchema, EnumDef, EnumItem, LangDef, Meta, ModelSchema,
    NsDef, ParamDef, ParamItem, PrefixDef, PropertySchema, RefSpec, ResourceSchema, Schema,
    UniqueDef,
};

pub const RESOURCE_TYPES: [&str; 16] = [
    "sql",
    "sql/sqlite",
    "sql/postgresql",
    "sql/mysql",
    "sql/mariadb",
    "sql/mssql",
    "sql/oracle",
    "sql/sas",
    "dask/memory",
    "dask/csv",
    "xml",
    "json",
    "ascii",
    "tabular",
    "internal_sql",
    "memory",
];

/// Node that meta rows attach to
#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Global,
    Dataset(usize),
    Resource(usize),
    Base(usize),
    Model(usize),
    Property(usize, usize),
}

/// Meta row that accepts continuation rows
#[derive(Debug, Clone, Copy)]
enum Open {
    Enum(Target, usize),
    Param(Target, usize),
}

struct RowReader {
    schemas: Vec<(usize, Schema)>,
    dataset: Option<String>,
    resource: Option<String>,
    base: Option<String>,
    model: Option<usize>,
    global: Option<usize>,
    target: Target,
    open: Option<Open>,
}

/// Read normalized rows into `(row, schema)` pairs. Row numbers count
/// the header as row 1.
pub fn read_rows(rows: Vec<TabularRow>) -> Result<Vec<(usize, Schema)>, ManifestError> {
    let mut reader = RowReader {
        schemas: Vec::new(),
        dataset: None,
        resource: None,
        base: None,
        model: None,
        global: None,
        target: Target::Global,
        open: None,
    };
    for (i, row) in rows.iter().enumerate() {
        reader.read_row(i + 2, row)?;
    }
    Ok(reader.schemas)
}

impl RowReader {
    fn read_row(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        if row.is_blank() {
            if let Target::Property(model, _) = self.target {
                self.target = Target::Model(model);
            }
            self.open = None;
            return Ok(());
        }

        match row.leftmost() {
            Some(Column::Dataset) => self.read_dataset(eid, row),
            Some(Column::Resource) => self.read_resource(eid, row),
            Some(Column::Base) => self.read_base(eid, row),
            Some(Column::Model) => self.read_model(eid, row),
            Some(Column::Property) => self.read_property(eid, row),
            _ if !row.get(Column::Type).is_empty() => self.read_meta(eid, row),
            _ => self.read_continuation(eid, row),
        }
    }

    fn read_dataset(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        let name = row.get(Column::Dataset).trim_matches('/').to_string();
        self.dataset = Some(name.clone());
        self.resource = None;
        self.base = None;
        self.model = None;
        self.open = None;
        self.schemas.push((
            eid,
            Schema::Dataset(DatasetSchema {
                id: id_of(row),
                name,
                attrs: attrs(eid, row)?,
                meta: Meta::default(),
            }),
        ));
        self.target = Target::Dataset(self.schemas.len() - 1);
        Ok(())
    }

    fn read_resource(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        let name = row.get(Column::Resource);
        self.model = None;
        self.open = None;

        if name == "/" {
            self.resource = None;
            self.target = self.outer_target();
            return Ok(());
        }

        if self.dataset.is_none() {
            return Err(ManifestError::tabular(
                eid,
                format!("resource '{}' is declared outside of a dataset", name),
            ));
        }

        let kind = row.get(Column::Type).to_string();
        if !kind.is_empty() && !RESOURCE_TYPES.contains(&kind.as_str()) {
            return Err(ManifestError::tabular(
                eid,
                format!("unknown resource type '{}'", kind),
            ));
        }

        self.resource = Some(name.to_string());
        self.schemas.push((
            eid,
            Schema::Resource(ResourceSchema {
                id: id_of(row),
                dataset: self.dataset.clone(),
                name: name.to_string(),
                kind,
                backend: row.get(Column::Ref).to_string(),
                external: row.get(Column::Source).to_string(),
                prepare: prepare(eid, row)?,
                attrs: attrs(eid, row)?,
                meta: Meta::default(),
            }),
        ));
        self.target = Target::Resource(self.schemas.len() - 1);
        Ok(())
    }

    fn read_base(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        let name = row.get(Column::Base);
        self.model = None;
        self.open = None;

        if name == "/" {
            self.base = None;
            self.target = self.outer_target();
            return Ok(());
        }

        let name = self.absolute(name);
        self.base = Some(name.clone());
        self.schemas.push((
            eid,
            Schema::Base(BaseSchema {
                id: id_of(row),
                dataset: self.dataset.clone(),
                name,
                pk: split_list(row.get(Column::Ref)),
                attrs: attrs(eid, row)?,
                meta: Meta::default(),
            }),
        ));
        self.target = Target::Base(self.schemas.len() - 1);
        Ok(())
    }

    fn read_model(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        let name = self.absolute(row.get(Column::Model));
        self.open = None;
        self.schemas.push((
            eid,
            Schema::Model(ModelSchema {
                id: id_of(row),
                dataset: self.dataset.clone(),
                resource: self.resource.clone(),
                base: self.base.clone(),
                name,
                pkeys: split_list(row.get(Column::Ref)),
                external: row.get(Column::Source).to_string(),
                prepare: prepare(eid, row)?,
                attrs: attrs(eid, row)?,
                meta: Meta::default(),
                properties: Vec::new(),
            }),
        ));
        let index = self.schemas.len() - 1;
        self.model = Some(index);
        self.target = Target::Model(index);
        Ok(())
    }

    fn read_property(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        let name = row.get(Column::Property);
        let model = self.model.ok_or_else(|| {
            ManifestError::tabular(eid, format!("property '{}' is declared outside of a model", name))
        })?;
        self.open = None;

        let type_cell = row.get(Column::Type);
        let dtype = if type_cell.is_empty() {
            Dtype::new(DataType::String)
        } else {
            Dtype::parse(type_cell).map_err(|message| ManifestError::tabular(eid, message))?
        };

        let property = PropertySchema {
            id: id_of(row),
            eid,
            name: name.to_string(),
            ref_: parse_ref(eid, &dtype, row.get(Column::Ref))?,
            dtype,
            external: row.get(Column::Source).to_string(),
            source_type: row.get(Column::SourceType).to_string(),
            prepare: prepare(eid, row)?,
            attrs: attrs(eid, row)?,
            meta: Meta::default(),
        };

        let Schema::Model(schema) = &mut self.schemas[model].1 else {
            return Err(ManifestError::tabular(eid, "property without model"));
        };
        schema.properties.push(property);
        self.target = Target::Property(model, schema.properties.len() - 1);
        Ok(())
    }

    fn read_meta(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        let kind = row.get(Column::Type);
        let target = self.meta_target(eid)?;
        let name = row.get(Column::Ref).to_string();
        self.open = None;

        match kind {
            "prefix" => self.meta_mut(target).prefixes.push(PrefixDef {
                id: id_of(row),
                name,
                uri: row.get(Column::Uri).to_string(),
                title: row.get(Column::Title).to_string(),
                description: row.get(Column::Description).to_string(),
            }),
            "ns" => self.meta_mut(target).namespaces.push(NsDef {
                id: id_of(row),
                name,
                title: row.get(Column::Title).to_string(),
                description: row.get(Column::Description).to_string(),
            }),
            "lang" => self.meta_mut(target).langs.push(LangDef {
                id: id_of(row),
                lang: name,
                title: row.get(Column::Title).to_string(),
                description: row.get(Column::Description).to_string(),
            }),
            "comment" => {
                let access = access(eid, row)?;
                self.meta_mut(target).comments.push(CommentDef {
                    id: id_of(row),
                    author: name,
                    access,
                    title: row.get(Column::Title).to_string(),
                    description: row.get(Column::Description).to_string(),
                })
            }
            "unique" => {
                if !matches!(target, Target::Model(_)) {
                    return Err(ManifestError::tabular(eid, "unique rows belong to a model"));
                }
                self.meta_mut(target).uniques.push(UniqueDef {
                    id: id_of(row),
                    properties: split_list(&name),
                })
            }
            "enum" => {
                reject_level(eid, row)?;
                let mut def = EnumDef {
                    id: id_of(row),
                    name,
                    items: Vec::new(),
                };
                if has_item(row) {
                    def.items.push(enum_item(eid, row, None)?);
                }
                let meta = self.meta_mut(target);
                meta.enums.push(def);
                let index = meta.enums.len() - 1;
                self.open = Some(Open::Enum(target, index));
            }
            "param" => {
                let mut def = ParamDef {
                    id: id_of(row),
                    name,
                    items: Vec::new(),
                };
                if has_item(row) {
                    def.items.push(param_item(eid, row, None)?);
                }
                let meta = self.meta_mut(target);
                meta.params.push(def);
                let index = meta.params.len() - 1;
                self.open = Some(Open::Param(target, index));
            }
            other => {
                return Err(ManifestError::tabular(
                    eid,
                    format!("row has no node to attach type '{}' to", other),
                ))
            }
        }
        Ok(())
    }

    fn read_continuation(&mut self, eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
        match self.open {
            Some(Open::Enum(target, index)) => {
                reject_level(eid, row)?;
                let item = enum_item(eid, row, id_of(row))?;
                self.meta_mut(target).enums[index].items.push(item);
                Ok(())
            }
            Some(Open::Param(target, index)) => {
                let item = param_item(eid, row, id_of(row))?;
                self.meta_mut(target).params[index].items.push(item);
                Ok(())
            }
            None => Err(ManifestError::tabular(eid, "row does not belong to any node")),
        }
    }

    fn meta_target(&mut self, eid: usize) -> Result<Target, ManifestError> {
        if self.target != Target::Global {
            return Ok(self.target);
        }
        if self.global.is_none() {
            self.schemas.push((eid, Schema::Global(Meta::default())));
            self.global = Some(self.schemas.len() - 1);
        }
        Ok(Target::Global)
    }

    fn meta_mut(&mut self, target: Target) -> &mut Meta {
        let index = match target {
            Target::Global => self.global.unwrap_or(0),
            Target::Dataset(i)
            | Target::Resource(i)
            | Target::Base(i)
            | Target::Model(i)
            | Target::Property(i, _) => i,
        };
        match (&mut self.schemas[index].1, target) {
            (Schema::Model(model), Target::Property(_, p)) => &mut model.properties[p].meta,
            (Schema::Global(meta), _) => meta,
            (Schema::Dataset(s), _) => &mut s.meta,
            (Schema::Resource(s), _) => &mut s.meta,
            (Schema::Base(s), _) => &mut s.meta,
            (Schema::Model(s), _) => &mut s.meta,
        }
    }

    /// Innermost of resource and dataset, after a `/` reset
    fn outer_target(&self) -> Target {
        let find = |kind: &str| {
            self.schemas
                .iter()
                .rposition(|(_, s)| s.kind() == kind)
        };
        if self.resource.is_some() {
            if let Some(i) = find("resource") {
                return Target::Resource(i);
            }
        }
        match (self.dataset.is_some(), find("dataset")) {
            (true, Some(i)) => Target::Dataset(i),
            _ => Target::Global,
        }
    }

    /// Names starting with `/` are absolute, others live in the open dataset
    fn absolute(&self, name: &str) -> String {
        if let Some(stripped) = name.strip_prefix('/') {
            return stripped.to_string();
        }
        match &self.dataset {
            Some(dataset) if !dataset.is_empty() => format!("{}/{}", dataset, name),
            _ => name.to_string(),
        }
    }
}

fn id_of(row: &TabularRow) -> Option<String> {
    let id = row.get(Column::Id);
    (!id.is_empty()).then(|| id.to_string())
}

fn split_list(cell: &str) -> Vec<String> {
    cell.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn has_item(row: &TabularRow) -> bool {
    !row.get(Column::Source).is_empty() || !row.get(Column::Prepare).is_empty()
}

fn reject_level(eid: usize, row: &TabularRow) -> Result<(), ManifestError> {
    let level = row.get(Column::Level);
    if level.is_empty() {
        return Ok(());
    }
    Err(ManifestError::InvalidValue {
        row: eid,
        field: "level".into(),
        value: level.to_string(),
        message: "enum rows cannot have a level".into(),
    })
}

fn level(eid: usize, row: &TabularRow) -> Result<Option<Level>, ManifestError> {
    let cell = row.get(Column::Level);
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<Level>()
        .map(Some)
        .map_err(|e| ManifestError::invalid(eid, "level", cell, e))
}

fn access(eid: usize, row: &TabularRow) -> Result<Option<Access>, ManifestError> {
    let cell = row.get(Column::Access);
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<Access>()
        .map(Some)
        .map_err(|e| ManifestError::invalid(eid, "access", cell, e))
}

fn attrs(eid: usize, row: &TabularRow) -> Result<Attrs, ManifestError> {
    Ok(Attrs {
        title: row.get(Column::Title).to_string(),
        description: row.get(Column::Description).to_string(),
        level: level(eid, row)?,
        access: access(eid, row)?,
        status: row.get(Column::Status).to_string(),
        visibility: row.get(Column::Visibility).to_string(),
        uri: row.get(Column::Uri).to_string(),
        eli: row.get(Column::Eli).to_string(),
        origin: row.get(Column::Origin).to_string(),
        count: row.get(Column::Count).to_string(),
    })
}

fn prepare(eid: usize, row: &TabularRow) -> Result<Option<Expr>, ManifestError> {
    let cell = row.get(Column::Prepare);
    if cell.is_empty() {
        return Ok(None);
    }
    parse_expr(cell).map(Some).map_err(|source| ManifestError::Expression {
        row: eid,
        field: "prepare",
        source,
    })
}

fn enum_item(eid: usize, row: &TabularRow, id: Option<String>) -> Result<EnumItem, ManifestError> {
    Ok(EnumItem {
        id,
        source: row.get(Column::Source).to_string(),
        prepare: prepare(eid, row)?,
        access: access(eid, row)?,
        title: row.get(Column::Title).to_string(),
        description: row.get(Column::Description).to_string(),
    })
}

fn param_item(eid: usize, row: &TabularRow, id: Option<String>) -> Result<ParamItem, ManifestError> {
    Ok(ParamItem {
        id,
        source: row.get(Column::Source).to_string(),
        prepare: prepare(eid, row)?,
        title: row.get(Column::Title).to_string(),
        description: row.get(Column::Description).to_string(),
    })
}

/// Parse a property `ref` cell. Reference types accept a bare model name,
/// `Model[a, b]` or `filter(Model, [a, b])`.
pub(crate) fn parse_ref(eid: usize, dtype: &Dtype, cell: &str) -> Result<RefSpec, ManifestError> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(RefSpec::None);
    }
    if !dtype.kind.is_reference() {
        return Ok(RefSpec::Raw(cell.to_string()));
    }

    if !cell.contains(['[', '(']) {
        return Ok(RefSpec::Model {
            model: cell.to_string(),
            refprops: Vec::new(),
        });
    }

    if let (Some(open), true, false) = (cell.find('['), cell.ends_with(']'), cell.contains('(')) {
        return Ok(RefSpec::Model {
            model: cell[..open].trim().to_string(),
            refprops: split_list(&cell[open + 1..cell.len() - 1]),
        });
    }

    let expr = parse_expr(cell).map_err(|source| ManifestError::Expression {
        row: eid,
        field: "ref",
        source,
    })?;
    match expr.as_call() {
        Some(("filter", [model, Expr::List(props)])) => {
            let model = model.as_bind();
            let refprops: Option<Vec<String>> = props
                .iter()
                .map(|p| p.as_bind().map(String::from))
                .collect();
            match (model, refprops) {
                (Some(model), Some(refprops)) => Ok(RefSpec::Model {
                    model: model.to_string(),
                    refprops,
                }),
                _ => Err(ManifestError::tabular(eid, format!("unsupported ref '{}'", cell))),
            }
        }
        _ => Err(ManifestError::tabular(eid, format!("unsupported ref '{}'", cell))),
    }
}

/// Inverse of [`parse_ref`]
pub(crate) fn format_ref(ref_: &RefSpec) -> String {
    match ref_ {
        RefSpec::None => String::new(),
        RefSpec::Raw(raw) => raw.clone(),
        RefSpec::Model { model, refprops } if refprops.is_empty() => model.clone(),
        RefSpec::Model { model, refprops } => format!("{}[{}]", model, refprops.join(", ")),
    }
}
