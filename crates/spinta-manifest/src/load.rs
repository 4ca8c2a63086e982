//! Building the manifest graph from schema items
//!
//! `load_nodes` can be called repeatedly. Items of a dataset that appears
//! in the new batch replace everything previously loaded for that dataset,
//! models replace same-named models, and the graph is rebuilt from the
//! merged items. The manifest is only touched when the rebuild succeeds.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::dtype::{DataType, Dtype};
use crate::error::ManifestError;
use crate::manifest::{
    Base, BaseId, Dataset, DatasetId, Manifest, Model, ModelId, NodeKey, Property, PropertyId,
    Resource, ResourceId,
};
use crate::schema::{Attrs, Meta, ModelSchema, RefSpec, Schema};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Append `_1`, `_2`, ... to repeated model and property names instead
    /// of failing
    pub rename_duplicates: bool,
}

pub fn load_nodes<I>(
    manifest: &mut Manifest,
    schemas: I,
    options: &LoadOptions,
) -> Result<(), ManifestError>
where
    I: IntoIterator<Item = (usize, Schema)>,
{
    let mut batch: Vec<(usize, Schema)> = schemas.into_iter().collect();
    dedupe_batch(&mut batch, options.rename_duplicates)?;

    let datasets: BTreeSet<String> = batch
        .iter()
        .filter_map(|(_, s)| match s {
            Schema::Dataset(d) => Some(d.name.clone()),
            _ => None,
        })
        .collect();
    let models: BTreeSet<String> = batch
        .iter()
        .filter_map(|(_, s)| match s {
            Schema::Model(m) => Some(m.name.clone()),
            _ => None,
        })
        .collect();
    let replaces_global = batch.iter().any(|(_, s)| matches!(s, Schema::Global(_)));

    let mut sources: Vec<(usize, Schema)> = manifest
        .sources
        .iter()
        .filter(|(_, schema)| {
            let in_replaced_dataset = schema
                .dataset()
                .map(|d| datasets.contains(d))
                .unwrap_or(false);
            let replaced = match schema {
                Schema::Global(_) => replaces_global,
                Schema::Model(m) => models.contains(&m.name),
                _ => false,
            };
            !(in_replaced_dataset || replaced)
        })
        .cloned()
        .collect();
    let replaced = manifest.sources.len() - sources.len();
    sources.extend(batch);

    let rebuilt = build(sources)?;
    debug!(
        datasets = rebuilt.datasets.len(),
        models = rebuilt.models.len(),
        replaced,
        "manifest nodes loaded"
    );
    *manifest = rebuilt;
    Ok(())
}

fn dedupe_batch(batch: &mut [(usize, Schema)], rename: bool) -> Result<(), ManifestError> {
    let mut datasets = BTreeSet::new();
    let mut models = BTreeSet::new();
    for (eid, schema) in batch.iter_mut() {
        match schema {
            Schema::Dataset(dataset) => {
                if !datasets.insert(dataset.name.clone()) {
                    return Err(ManifestError::DuplicateName {
                        row: *eid,
                        kind: "dataset",
                        name: dataset.name.clone(),
                    });
                }
            }
            Schema::Model(model) => {
                if models.contains(&model.name) {
                    if !rename {
                        return Err(ManifestError::DuplicateName {
                            row: *eid,
                            kind: "model",
                            name: model.name.clone(),
                        });
                    }
                    model.name = unique_name(&model.name, &models);
                }
                models.insert(model.name.clone());
                dedupe_properties(model, rename)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn dedupe_properties(model: &mut ModelSchema, rename: bool) -> Result<(), ManifestError> {
    let mut seen = BTreeSet::new();
    for property in model.properties.iter_mut() {
        if seen.contains(&property.name) {
            if !rename {
                return Err(ManifestError::DuplicateName {
                    row: property.eid,
                    kind: "property",
                    name: format!("{}.{}", model.name, property.name),
                });
            }
            property.name = unique_name(&property.name, &seen);
        }
        seen.insert(property.name.clone());
    }
    Ok(())
}

fn unique_name(name: &str, taken: &BTreeSet<String>) -> String {
    (1..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Build a fresh graph from schema items in order
pub(crate) fn build(sources: Vec<(usize, Schema)>) -> Result<Manifest, ManifestError> {
    let mut manifest = Manifest::new();
    let mut latest_base: HashMap<(Option<String>, String), BaseId> = HashMap::new();

    for (eid, schema) in &sources {
        let eid = *eid;
        match schema {
            Schema::Global(meta) => manifest.global.extend(meta.clone()),
            Schema::Dataset(schema) => {
                if manifest.dataset_index.contains_key(&schema.name) {
                    return Err(ManifestError::DuplicateName {
                        row: eid,
                        kind: "dataset",
                        name: schema.name.clone(),
                    });
                }
                let id = DatasetId(manifest.datasets.len());
                manifest.datasets.push(Dataset {
                    key: NodeKey::new(schema.id.as_ref(), eid),
                    name: schema.name.clone(),
                    attrs: schema.attrs.clone(),
                    meta: schema.meta.clone(),
                    resources: Vec::new(),
                    bases: Vec::new(),
                    models: Vec::new(),
                });
                manifest.dataset_index.insert(schema.name.clone(), id);
            }
            Schema::Resource(schema) => {
                let dataset = dataset_of(&manifest, eid, schema.dataset.as_deref())?;
                if let Some(dataset) = dataset {
                    let taken = manifest
                        .dataset(dataset)
                        .resources
                        .iter()
                        .any(|r| manifest.resource(*r).name == schema.name);
                    if taken {
                        return Err(ManifestError::DuplicateName {
                            row: eid,
                            kind: "resource",
                            name: schema.name.clone(),
                        });
                    }
                }
                let id = ResourceId(manifest.resources.len());
                manifest.resources.push(Resource {
                    key: NodeKey::new(schema.id.as_ref(), eid),
                    dataset,
                    name: schema.name.clone(),
                    kind: schema.kind.clone(),
                    backend: schema.backend.clone(),
                    external: schema.external.clone(),
                    prepare: schema.prepare.clone(),
                    attrs: schema.attrs.clone(),
                    meta: schema.meta.clone(),
                    models: Vec::new(),
                });
                if let Some(dataset) = dataset {
                    manifest.datasets[dataset.0].resources.push(id);
                }
            }
            Schema::Base(schema) => {
                let dataset = dataset_of(&manifest, eid, schema.dataset.as_deref())?;
                let id = BaseId(manifest.bases.len());
                manifest.bases.push(Base {
                    key: NodeKey::new(schema.id.as_ref(), eid),
                    dataset,
                    name: schema.name.clone(),
                    pk: schema.pk.clone(),
                    attrs: schema.attrs.clone(),
                    meta: schema.meta.clone(),
                    model: None,
                });
                if let Some(dataset) = dataset {
                    manifest.datasets[dataset.0].bases.push(id);
                }
                latest_base.insert((schema.dataset.clone(), schema.name.clone()), id);
            }
            Schema::Model(schema) => {
                add_model(&mut manifest, eid, schema, &latest_base)?;
            }
        }
    }

    manifest.sources = sources;
    Ok(manifest)
}

fn dataset_of(
    manifest: &Manifest,
    eid: usize,
    name: Option<&str>,
) -> Result<Option<DatasetId>, ManifestError> {
    match name {
        None => Ok(None),
        Some(name) => manifest
            .get_dataset(name)
            .map(Some)
            .ok_or_else(|| ManifestError::tabular(eid, format!("dataset '{}' is not loaded", name))),
    }
}

fn add_model(
    manifest: &mut Manifest,
    eid: usize,
    schema: &ModelSchema,
    latest_base: &HashMap<(Option<String>, String), BaseId>,
) -> Result<(), ManifestError> {
    if manifest.model_index.contains_key(&schema.name) {
        return Err(ManifestError::DuplicateName {
            row: eid,
            kind: "model",
            name: schema.name.clone(),
        });
    }

    let dataset = dataset_of(manifest, eid, schema.dataset.as_deref())?;
    let resource = match (&schema.resource, dataset) {
        (Some(name), Some(dataset)) => manifest
            .dataset(dataset)
            .resources
            .iter()
            .copied()
            .find(|r| &manifest.resource(*r).name == name),
        _ => None,
    };
    let base = schema
        .base
        .as_ref()
        .and_then(|name| latest_base.get(&(schema.dataset.clone(), name.clone())).copied());

    let id = ModelId(manifest.models.len());
    manifest.models.push(Model {
        key: NodeKey::new(schema.id.as_ref(), eid),
        name: schema.name.clone(),
        dataset,
        resource,
        base,
        pkeys: schema.pkeys.clone(),
        external: schema.external.clone(),
        prepare: schema.prepare.clone(),
        attrs: schema.attrs.clone(),
        meta: schema.meta.clone(),
        properties: Vec::new(),
        pkey_ids: Vec::new(),
        resolved_uri: None,
    });
    manifest.model_index.insert(schema.name.clone(), id);
    match dataset {
        Some(dataset) => manifest.datasets[dataset.0].models.push(id),
        None => manifest.global_models.push(id),
    }
    if let Some(resource) = resource {
        manifest.resources[resource.0].models.push(id);
    }

    let mut by_name: BTreeMap<String, PropertyId> = BTreeMap::new();
    for property in &schema.properties {
        let pid = PropertyId(manifest.properties.len());
        manifest.properties.push(Property {
            key: NodeKey::new(property.id.as_ref(), property.eid),
            model: id,
            name: property.name.clone(),
            dtype: property.dtype.clone(),
            ref_: property.ref_.clone(),
            external: property.external.clone(),
            source_type: property.source_type.clone(),
            prepare: property.prepare.clone(),
            attrs: property.attrs.clone(),
            meta: property.meta.clone(),
            inherited: false,
            synthetic: false,
            langs: Vec::new(),
            ref_model: None,
            refprop_ids: Vec::new(),
            resolved_uri: None,
        });
        manifest.models[id.0].properties.push(pid);
        by_name.insert(property.name.clone(), pid);
    }

    attach_langs(manifest, id, &mut by_name);
    Ok(())
}

/// Group `name@lang` properties under their root, creating a `text` root
/// when the model has none
fn attach_langs(manifest: &mut Manifest, model: ModelId, by_name: &mut BTreeMap<String, PropertyId>) {
    let variants: Vec<(PropertyId, String)> = manifest.models[model.0]
        .properties
        .iter()
        .filter_map(|pid| {
            let name = &manifest.properties[pid.0].name;
            match Property::split_lang(name) {
                (root, Some(_)) => Some((*pid, root.to_string())),
                _ => None,
            }
        })
        .collect();

    for (variant, root) in variants {
        let root_id = match by_name.get(&root) {
            Some(root_id) => *root_id,
            None => {
                let eid = manifest.properties[variant.0].key.eid;
                let root_id = PropertyId(manifest.properties.len());
                manifest.properties.push(Property {
                    key: NodeKey::new(None, eid),
                    model,
                    name: root.clone(),
                    dtype: Dtype::new(DataType::Text),
                    ref_: RefSpec::None,
                    external: String::new(),
                    source_type: String::new(),
                    prepare: None,
                    attrs: Attrs::default(),
                    meta: Meta::default(),
                    inherited: false,
                    synthetic: true,
                    langs: Vec::new(),
                    ref_model: None,
                    refprop_ids: Vec::new(),
                    resolved_uri: None,
                });
                let properties = &mut manifest.models[model.0].properties;
                let position = properties
                    .iter()
                    .position(|p| *p == variant)
                    .unwrap_or(properties.len());
                properties.insert(position, root_id);
                by_name.insert(root, root_id);
                root_id
            }
        };
        manifest.properties[root_id.0].langs.push(variant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::read_tabular_str;

    const COUNTRIES: &str = "dataset,model,property,type,ref\n\
        ds,,,,\n\
        ,Country,,,code\n\
        ,,code,string,\n\
        ,,name@lt,string,\n\
        ,,name@en,string,\n";

    fn load(csv: &str, options: &LoadOptions) -> Result<Manifest, ManifestError> {
        let mut manifest = Manifest::new();
        load_nodes(&mut manifest, read_tabular_str(csv)?, options)?;
        Ok(manifest)
    }

    #[test]
    fn test_synthesized_text_root() {
        let manifest = load(COUNTRIES, &LoadOptions::default()).unwrap();
        let country = manifest.get_model("ds/Country").unwrap();
        let root = manifest.get_property(country, "name").unwrap();
        let root = manifest.property(root);
        assert!(root.synthetic);
        assert_eq!(root.dtype.kind, DataType::Text);
        assert_eq!(root.langs.len(), 2);
    }

    #[test]
    fn test_reload_replaces_dataset() {
        let mut manifest = load(COUNTRIES, &LoadOptions::default()).unwrap();
        let smaller = "dataset,model,property,type\nds,,,\n,City,,\n,,name,string\n";
        load_nodes(
            &mut manifest,
            read_tabular_str(smaller).unwrap(),
            &LoadOptions::default(),
        )
        .unwrap();
        assert!(!manifest.has_model("ds/Country"));
        assert!(manifest.has_model("ds/City"));
        assert_eq!(manifest.datasets().count(), 1);
    }

    #[test]
    fn test_same_load_twice_is_idempotent() {
        let mut manifest = load(COUNTRIES, &LoadOptions::default()).unwrap();
        load_nodes(
            &mut manifest,
            read_tabular_str(COUNTRIES).unwrap(),
            &LoadOptions::default(),
        )
        .unwrap();
        assert_eq!(manifest.get_models().count(), 1);
    }

    #[test]
    fn test_duplicate_model_fails_and_keeps_previous_state() {
        let mut manifest = load(COUNTRIES, &LoadOptions::default()).unwrap();
        let duplicated = "dataset,model\nother,\n,A\n,A\n";
        let err = load_nodes(
            &mut manifest,
            read_tabular_str(duplicated).unwrap(),
            &LoadOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateName { row: 4, .. }));
        assert!(manifest.has_model("ds/Country"));
        assert!(manifest.get_dataset("other").is_none());
    }

    #[test]
    fn test_rename_duplicates() {
        let csv = "dataset,model,property,type\nds,,,\n,A,,\n,,x,string\n,,x,integer\n,A,,\n";
        let manifest = load(
            csv,
            &LoadOptions {
                rename_duplicates: true,
            },
        )
        .unwrap();
        assert!(manifest.has_model("ds/A"));
        assert!(manifest.has_model("ds/A_1"));
        let a = manifest.get_model("ds/A").unwrap();
        assert!(manifest.find_property(a, "x_1").is_some());
    }
}
