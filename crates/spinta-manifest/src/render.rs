//! Rendering the manifest back into tabular rows
//!
//! Order: global meta rows, models without a dataset, then every dataset
//! with its meta rows, its models without a resource, and each resource
//! followed by its models. Base rows are written whenever the base in
//! effect changes, `/` clearing it.

use std::str::FromStr;

use spinta_core::Access;
use spinta_spyna::unparse;
use tracing::warn;

use crate::manifest::{BaseId, DatasetId, Manifest, ModelId, NodeKey, NodeRef, PropertyId};
use crate::schema::{Attrs, Meta};
use crate::tabular::{Column, TabularRow};
use crate::tabular::format_ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    /// Properties by descending access, stable
    Access,
}

impl FromStr for OrderBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(OrderBy::Access),
            other => Err(format!("cannot order by '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Keep `source`, `source.type` and `prepare`
    pub external: bool,
    /// Drop nodes whose effective access is below this
    pub access: Option<Access>,
    pub order_by: Option<OrderBy>,
    /// Write generated ids too, not only the ones read from the source
    pub all_ids: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            external: true,
            access: None,
            order_by: None,
            all_ids: false,
        }
    }
}

/// `datasets_to_tabular(manifest, external, access, order_by)`
pub fn datasets_to_tabular(manifest: &Manifest, options: &RenderOptions) -> Vec<TabularRow> {
    let mut renderer = Renderer {
        manifest,
        options,
        rows: Vec::new(),
        base: None,
    };
    renderer.meta(&manifest.global, options);

    let global_models = manifest.global_models().to_vec();
    renderer.models(None, &global_models);

    for (id, _) in manifest.datasets() {
        renderer.dataset(id);
    }
    renderer.rows
}

/// Rows of a single dataset
pub fn dataset_to_tabular(manifest: &Manifest, dataset: DatasetId, options: &RenderOptions) -> Vec<TabularRow> {
    let mut renderer = Renderer {
        manifest,
        options,
        rows: Vec::new(),
        base: None,
    };
    renderer.dataset(dataset);
    renderer.rows
}

struct Renderer<'a> {
    manifest: &'a Manifest,
    options: &'a RenderOptions,
    rows: Vec<TabularRow>,
    base: Option<BaseId>,
}

impl<'a> Renderer<'a> {
    fn visible(&self, node: NodeRef) -> bool {
        match self.options.access {
            Some(threshold) => self.manifest.effective_access(node) >= threshold,
            None => true,
        }
    }

    fn visible_properties(&self, model: ModelId) -> Vec<PropertyId> {
        let manifest = self.manifest;
        manifest
            .model(model)
            .properties
            .iter()
            .copied()
            .filter(|p| {
                let property = manifest.property(*p);
                !property.inherited && !property.synthetic
            })
            .filter(|p| self.visible(NodeRef::Property(*p)))
            .collect()
    }

    /// A reference to a model that is not rendered would not link again
    fn dangling(&self, id: PropertyId) -> bool {
        let property = self.manifest.property(id);
        match property.ref_model {
            Some(target) if !self.model_visible(target) => {
                warn!(
                    property = %property.name,
                    model = %self.manifest.model(property.model).name,
                    target = %self.manifest.model(target).name,
                    "reference dropped, target model is below the access threshold"
                );
                true
            }
            _ => false,
        }
    }

    fn renderable_properties(&self, model: ModelId) -> Vec<PropertyId> {
        let manifest = self.manifest;
        let mut properties = self.visible_properties(model);
        if self.options.access.is_some() {
            properties.retain(|p| !self.dangling(*p));
        }
        if self.options.order_by == Some(OrderBy::Access) {
            properties.sort_by_key(|p| {
                std::cmp::Reverse(manifest.effective_access(NodeRef::Property(*p)))
            });
        }
        properties
    }

    fn model_visible(&self, model: ModelId) -> bool {
        if self.options.access.is_none() {
            return true;
        }
        let declared = self
            .manifest
            .model(model)
            .properties
            .iter()
            .filter(|p| {
                let property = self.manifest.property(**p);
                !property.inherited && !property.synthetic
            })
            .count();
        if declared == 0 {
            return self.visible(NodeRef::Model(model));
        }
        !self.visible_properties(model).is_empty()
    }

    fn dataset(&mut self, id: DatasetId) {
        let manifest = self.manifest;
        let dataset = manifest.dataset(id);
        let models: Vec<ModelId> = dataset
            .models
            .iter()
            .copied()
            .filter(|m| self.model_visible(*m))
            .collect();
        if models.is_empty() && !dataset.models.is_empty() {
            return;
        }
        if models.is_empty() && !self.visible(NodeRef::Dataset(id)) {
            return;
        }

        let mut row = self.key_row(&dataset.key).with(Column::Dataset, &dataset.name);
        set_attrs(&mut row, &dataset.attrs);
        self.rows.push(row);
        self.meta(&dataset.meta, self.options);
        self.base = None;

        let without_resource: Vec<ModelId> = manifest
            .dataset_models_without_resource(id)
            .into_iter()
            .filter(|m| models.contains(m))
            .collect();
        self.models(Some(id), &without_resource);

        for rid in &dataset.resources {
            let resource = manifest.resource(*rid);
            let resource_models: Vec<ModelId> = resource
                .models
                .iter()
                .copied()
                .filter(|m| models.contains(m))
                .collect();
            if resource_models.is_empty()
                && (!resource.models.is_empty() || !self.visible(NodeRef::Resource(*rid)))
            {
                continue;
            }

            let mut row = self
                .key_row(&resource.key)
                .with(Column::Resource, &resource.name)
                .with(Column::Type, &resource.kind)
                .with(Column::Ref, &resource.backend);
            if self.options.external {
                row.set(Column::Source, &resource.external);
                row.set(Column::Prepare, prepare_text(&resource.prepare));
            }
            set_attrs(&mut row, &resource.attrs);
            self.rows.push(row);
            self.meta(&resource.meta, self.options);
            self.models(Some(id), &resource_models);
        }

        // bases no model refers to
        if self.options.access.is_none() {
            for bid in &dataset.bases {
                let used = manifest.get_models().any(|(_, m)| m.base == Some(*bid));
                if !used {
                    self.base_row(*bid, Some(id));
                }
            }
        }
    }

    fn models(&mut self, dataset: Option<DatasetId>, models: &[ModelId]) {
        for model in models {
            if self.model_visible(*model) {
                self.model(dataset, *model);
            }
        }
    }

    fn base_row(&mut self, id: BaseId, dataset: Option<DatasetId>) {
        let base = self.manifest.base(id);
        let mut row = self
            .key_row(&base.key)
            .with(Column::Base, relative_name(self.manifest, &base.name, dataset))
            .with(Column::Ref, base.pk.join(", "));
        set_attrs(&mut row, &base.attrs);
        self.rows.push(row);
        self.meta(&base.meta, self.options);
        self.base = Some(id);
    }

    fn model(&mut self, dataset: Option<DatasetId>, id: ModelId) {
        let manifest = self.manifest;
        let model = manifest.model(id);

        if model.base != self.base {
            match model.base {
                Some(base) => self.base_row(base, dataset),
                None => {
                    self.rows.push(TabularRow::new().with(Column::Base, "/"));
                    self.base = None;
                }
            }
        }

        let mut row = self
            .key_row(&model.key)
            .with(Column::Model, relative_name(manifest, &model.name, dataset))
            .with(Column::Ref, model.pkeys.join(", "));
        if self.options.external {
            row.set(Column::Source, &model.external);
            row.set(Column::Prepare, prepare_text(&model.prepare));
        }
        set_attrs(&mut row, &model.attrs);
        self.rows.push(row);
        self.meta(&model.meta, self.options);

        for pid in self.renderable_properties(id) {
            let row = property_row(manifest, pid, self.options);
            self.rows.push(row);
            self.meta(&manifest.property(pid).meta, self.options);
        }
    }

    fn key_row(&self, key: &NodeKey) -> TabularRow {
        let mut row = TabularRow::new();
        if key.id_given || self.options.all_ids {
            row.set(Column::Id, &key.id);
        }
        row
    }

    fn meta(&mut self, meta: &Meta, options: &RenderOptions) {
        self.rows.extend(meta_rows(meta, options));
    }
}

pub(crate) fn property_row(manifest: &Manifest, id: PropertyId, options: &RenderOptions) -> TabularRow {
    let property = manifest.property(id);
    let mut row = TabularRow::new()
        .with(Column::Property, &property.name)
        .with(Column::Type, property.dtype.to_string())
        .with(Column::Ref, format_ref(&property.ref_));
    if property.key.id_given || options.all_ids {
        row.set(Column::Id, &property.key.id);
    }
    if options.external {
        row.set(Column::Source, &property.external);
        row.set(Column::SourceType, &property.source_type);
        row.set(Column::Prepare, prepare_text(&property.prepare));
    }
    set_attrs(&mut row, &property.attrs);
    row
}

fn prepare_text(prepare: &Option<spinta_spyna::Expr>) -> String {
    prepare.as_ref().map(unparse).unwrap_or_default()
}

fn set_attrs(row: &mut TabularRow, attrs: &Attrs) {
    row.set(Column::Title, &attrs.title);
    row.set(Column::Description, &attrs.description);
    row.set(
        Column::Level,
        attrs.level.map(|l| l.to_string()).unwrap_or_default(),
    );
    row.set(
        Column::Access,
        attrs.access.map(|a| a.as_str()).unwrap_or_default(),
    );
    row.set(Column::Status, &attrs.status);
    row.set(Column::Visibility, &attrs.visibility);
    row.set(Column::Uri, &attrs.uri);
    row.set(Column::Eli, &attrs.eli);
    row.set(Column::Origin, &attrs.origin);
    row.set(Column::Count, &attrs.count);
}

fn meta_id(row: &mut TabularRow, id: &Option<String>) {
    if let Some(id) = id {
        row.set(Column::Id, id);
    }
}

fn item_visible(access: Option<Access>, options: &RenderOptions) -> bool {
    match (access, options.access) {
        (Some(access), Some(threshold)) => access >= threshold,
        _ => true,
    }
}

pub(crate) fn meta_rows(meta: &Meta, options: &RenderOptions) -> Vec<TabularRow> {
    let mut rows = Vec::new();

    for ns in &meta.namespaces {
        let mut row = TabularRow::new()
            .with(Column::Type, "ns")
            .with(Column::Ref, &ns.name)
            .with(Column::Title, &ns.title)
            .with(Column::Description, &ns.description);
        meta_id(&mut row, &ns.id);
        rows.push(row);
    }

    for prefix in &meta.prefixes {
        let mut row = TabularRow::new()
            .with(Column::Type, "prefix")
            .with(Column::Ref, &prefix.name)
            .with(Column::Uri, &prefix.uri)
            .with(Column::Title, &prefix.title)
            .with(Column::Description, &prefix.description);
        meta_id(&mut row, &prefix.id);
        rows.push(row);
    }

    for def in &meta.enums {
        let mut head = TabularRow::new()
            .with(Column::Type, "enum")
            .with(Column::Ref, &def.name);
        meta_id(&mut head, &def.id);
        let items: Vec<_> = def
            .items
            .iter()
            .filter(|item| item_visible(item.access, options))
            .collect();
        for (i, item) in items.iter().enumerate() {
            let mut row = if i == 0 {
                head.clone()
            } else {
                let mut row = TabularRow::new();
                meta_id(&mut row, &item.id);
                row
            };
            row.set(Column::Source, &item.source);
            row.set(Column::Prepare, prepare_text(&item.prepare));
            row.set(
                Column::Access,
                item.access.map(|a| a.as_str()).unwrap_or_default(),
            );
            row.set(Column::Title, &item.title);
            row.set(Column::Description, &item.description);
            rows.push(row);
        }
        if items.is_empty() {
            rows.push(head);
        }
    }

    for lang in &meta.langs {
        let mut row = TabularRow::new()
            .with(Column::Type, "lang")
            .with(Column::Ref, &lang.lang)
            .with(Column::Title, &lang.title)
            .with(Column::Description, &lang.description);
        meta_id(&mut row, &lang.id);
        rows.push(row);
    }

    for comment in &meta.comments {
        if !item_visible(comment.access, options) {
            continue;
        }
        let mut row = TabularRow::new()
            .with(Column::Type, "comment")
            .with(Column::Ref, &comment.author)
            .with(
                Column::Access,
                comment.access.map(|a| a.as_str()).unwrap_or_default(),
            )
            .with(Column::Title, &comment.title)
            .with(Column::Description, &comment.description);
        meta_id(&mut row, &comment.id);
        rows.push(row);
    }

    for param in &meta.params {
        let mut head = TabularRow::new()
            .with(Column::Type, "param")
            .with(Column::Ref, &param.name);
        meta_id(&mut head, &param.id);
        if param.items.is_empty() {
            rows.push(head);
            continue;
        }
        for (i, item) in param.items.iter().enumerate() {
            let mut row = if i == 0 {
                head.clone()
            } else {
                let mut row = TabularRow::new();
                meta_id(&mut row, &item.id);
                row
            };
            row.set(Column::Source, &item.source);
            row.set(Column::Prepare, prepare_text(&item.prepare));
            row.set(Column::Title, &item.title);
            row.set(Column::Description, &item.description);
            rows.push(row);
        }
    }

    for unique in &meta.uniques {
        let mut row = TabularRow::new()
            .with(Column::Type, "unique")
            .with(Column::Ref, unique.properties.join(", "));
        meta_id(&mut row, &unique.id);
        rows.push(row);
    }

    rows
}

/// Name as written inside `dataset`: relative when it lives there,
/// absolute (`/`-prefixed) otherwise
pub(crate) fn relative_name(manifest: &Manifest, name: &str, dataset: Option<DatasetId>) -> String {
    match dataset {
        Some(dataset) => {
            let prefix = format!("{}/", manifest.dataset(dataset).name);
            match name.strip_prefix(&prefix) {
                Some(relative) => relative.to_string(),
                None => format!("/{}", name),
            }
        }
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::link;
    use crate::load::{load_nodes, LoadOptions};
    use crate::tabular::{read_rows, read_tabular_str, used_columns, write_tabular_string};

    fn load(csv: &str) -> Manifest {
        let mut manifest = Manifest::new();
        load_nodes(&mut manifest, read_tabular_str(csv).unwrap(), &LoadOptions::default()).unwrap();
        link(&mut manifest).unwrap();
        manifest
    }

    fn reload(rows: Vec<TabularRow>) -> Manifest {
        let mut manifest = Manifest::new();
        load_nodes(&mut manifest, read_rows(rows).unwrap(), &LoadOptions::default()).unwrap();
        link(&mut manifest).unwrap();
        manifest
    }

    const EXAMPLE: &str = "id,dataset,resource,base,model,property,type,ref,source,prepare,level,access,title\n\
        ,datasets/gov/example,,,,,,,,,,,Example\n\
        ,,,,,,prefix,locn,,,,,\n\
        ,,data,,,,sql,default,sqlite://,,,,\n\
        ,,,,Country,,,code,salis,,3,,\n\
        ,,,,,code,string,,kodas,,,open,\n\
        ,,,,,name@lt,string,,pavadinimas,,,open,\n\
        ,,,,City,,,,miestas,,,,\n\
        ,,,,,name,string,,pavadinimas,,,open,\n\
        ,,,,,country,ref,Country,salis,,,open,\n\
        ,,,,,secret,string,,slaptas,,,private,\n";

    #[test]
    fn test_render_is_stable() {
        let manifest = load(EXAMPLE);
        let rows = datasets_to_tabular(&manifest, &RenderOptions::default());
        let again = datasets_to_tabular(&reload(rows.clone()), &RenderOptions::default());
        assert_eq!(rows, again);
    }

    #[test]
    fn test_synthetic_root_not_rendered() {
        let manifest = load(EXAMPLE);
        let rows = datasets_to_tabular(&manifest, &RenderOptions::default());
        assert!(rows.iter().all(|r| r.get(Column::Property) != "name"
            || r.get(Column::Type) == "string"));
        assert!(rows.iter().any(|r| r.get(Column::Property) == "name@lt"));
    }

    #[test]
    fn test_no_external_and_access_filter() {
        let manifest = load(EXAMPLE);
        let rows = datasets_to_tabular(
            &manifest,
            &RenderOptions {
                external: false,
                access: Some(Access::Open),
                ..RenderOptions::default()
            },
        );
        assert!(rows.iter().all(|r| r.get(Column::Source).is_empty()));
        assert!(rows.iter().all(|r| r.get(Column::Prepare).is_empty()));
        assert!(!rows.iter().any(|r| r.get(Column::Property) == "secret"));
        assert!(rows.iter().any(|r| r.get(Column::Model) == "Country"));
        assert!(rows.iter().any(|r| r.get(Column::Model) == "City"));
        let columns = used_columns(&rows);
        assert!(!columns.contains(&Column::Source));
        let text = write_tabular_string(&rows, &columns).unwrap();
        assert!(text.starts_with("dataset,resource,base,model,property,type,ref"));
    }

    #[test]
    fn test_reference_to_filtered_model_is_dropped() {
        let manifest = load(
            "model,property,type,ref,access\n\
             Country,,,,\n\
             ,code,string,,private\n\
             City,,,,\n\
             ,name,string,,open\n\
             ,country,ref,Country,open\n",
        );
        let rows = datasets_to_tabular(
            &manifest,
            &RenderOptions {
                access: Some(Access::Open),
                ..RenderOptions::default()
            },
        );
        assert!(!rows.iter().any(|r| r.get(Column::Model) == "Country"));
        assert!(!rows.iter().any(|r| r.get(Column::Property) == "country"));
        assert!(rows.iter().any(|r| r.get(Column::Property) == "name"));
        let copied = reload(rows);
        assert!(copied.get_models().any(|(_, m)| m.name == "City"));
    }

    #[test]
    fn test_order_by_access() {
        let manifest = load(
            "model,property,type,access\n\
             City,,,\n\
             ,a,string,private\n\
             ,b,string,open\n\
             ,c,string,public\n\
             ,d,string,open\n",
        );
        let rows = datasets_to_tabular(
            &manifest,
            &RenderOptions {
                order_by: Some(OrderBy::Access),
                ..RenderOptions::default()
            },
        );
        let names: Vec<&str> = rows
            .iter()
            .map(|r| r.get(Column::Property))
            .filter(|p| !p.is_empty())
            .collect();
        assert_eq!(names, vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn test_base_rows_and_reset() {
        let csv = "dataset,base,model,property,type,ref\n\
                   geo,,,,,\n\
                   ,,Location,,,id\n\
                   ,,,id,integer,\n\
                   ,Location,,,,id\n\
                   ,,City,,,id\n\
                   ,/,,,,\n\
                   ,,Street,,,\n";
        let manifest = load(csv);
        let rows = datasets_to_tabular(&manifest, &RenderOptions::default());
        let bases: Vec<&str> = rows
            .iter()
            .map(|r| r.get(Column::Base))
            .filter(|b| !b.is_empty())
            .collect();
        assert_eq!(bases, vec!["Location", "/"]);
        // the inherited `id` is not written under City
        let city = rows.iter().position(|r| r.get(Column::Model) == "City").unwrap();
        assert_eq!(rows[city + 1].get(Column::Base), "/");
    }

    #[test]
    fn test_enum_rows_follow_property() {
        let manifest = load(
            "model,property,type,ref,source,prepare\n\
             Side,,,,,\n\
             ,side,string,,,\n\
             ,,enum,,l,'left'\n\
             ,,,,r,'right'\n",
        );
        let rows = datasets_to_tabular(&manifest, &RenderOptions::default());
        let side = rows.iter().position(|r| r.get(Column::Property) == "side").unwrap();
        assert_eq!(rows[side + 1].get(Column::Type), "enum");
        assert_eq!(rows[side + 1].get(Column::Prepare), "'left'");
        assert_eq!(rows[side + 2].get(Column::Source), "r");
    }
}
