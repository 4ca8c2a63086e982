//! In-memory manifest graph
//!
//! Nodes live in per-kind arenas and refer to each other through typed
//! indices; the manifest is the single owner. Models know their
//! properties and properties know their model without any shared
//! pointers.

use std::collections::BTreeMap;

use spinta_core::Access;
use spinta_spyna::Expr;

use crate::dtype::Dtype;
use crate::error::ManifestError;
use crate::schema::{Attrs, Meta, RefSpec, Schema};

macro_rules! node_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(&self) -> usize {
                self.0
            }
        }
    };
}

node_id!(DatasetId);
node_id!(ResourceId);
node_id!(BaseId);
node_id!(ModelId);
node_id!(PropertyId);

/// Reference to any structural node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Dataset(DatasetId),
    Resource(ResourceId),
    Base(BaseId),
    Model(ModelId),
    Property(PropertyId),
}

/// Identity shared by every node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeKey {
    /// UUID, generated on load when the row has none
    pub id: String,
    /// Whether the id came from the source
    pub id_given: bool,
    /// Row the node was read from
    pub eid: usize,
}

impl NodeKey {
    pub(crate) fn new(id: Option<&String>, eid: usize) -> Self {
        match id {
            Some(id) => Self {
                id: id.clone(),
                id_given: true,
                eid,
            },
            None => Self {
                id: uuid::Uuid::new_v4().to_string(),
                id_given: false,
                eid,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub key: NodeKey,
    pub name: String,
    pub attrs: Attrs,
    pub meta: Meta,
    pub resources: Vec<ResourceId>,
    pub bases: Vec<BaseId>,
    /// Every model declared in the dataset, in declaration order
    pub models: Vec<ModelId>,
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub key: NodeKey,
    pub dataset: Option<DatasetId>,
    pub name: String,
    pub kind: String,
    pub backend: String,
    pub external: String,
    pub prepare: Option<Expr>,
    pub attrs: Attrs,
    pub meta: Meta,
    pub models: Vec<ModelId>,
}

#[derive(Debug, Clone)]
pub struct Base {
    pub key: NodeKey,
    pub dataset: Option<DatasetId>,
    /// Absolute name of the base model
    pub name: String,
    pub pk: Vec<String>,
    pub attrs: Attrs,
    pub meta: Meta,
    /// Resolved by `link`
    pub model: Option<ModelId>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub key: NodeKey,
    /// Absolute name, `dataset/Model`
    pub name: String,
    pub dataset: Option<DatasetId>,
    pub resource: Option<ResourceId>,
    pub base: Option<BaseId>,
    pub pkeys: Vec<String>,
    pub external: String,
    pub prepare: Option<Expr>,
    pub attrs: Attrs,
    pub meta: Meta,
    pub properties: Vec<PropertyId>,
    /// Resolved by `link`
    pub pkey_ids: Vec<PropertyId>,
    pub resolved_uri: Option<String>,
}

impl Model {
    /// Name without the dataset part
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub key: NodeKey,
    pub model: ModelId,
    pub name: String,
    pub dtype: Dtype,
    pub ref_: RefSpec,
    pub external: String,
    pub source_type: String,
    pub prepare: Option<Expr>,
    pub attrs: Attrs,
    pub meta: Meta,
    /// Installed from a base by `link`; not rendered
    pub inherited: bool,
    /// `text` root created for `name@lang` variants; not rendered
    pub synthetic: bool,
    /// Language variants aggregated by a `text` root
    pub langs: Vec<PropertyId>,
    /// Resolved by `link`
    pub ref_model: Option<ModelId>,
    pub refprop_ids: Vec<PropertyId>,
    pub resolved_uri: Option<String>,
}

impl Property {
    /// `title@lt` -> `("title", Some("lt"))`
    pub fn split_lang(name: &str) -> (&str, Option<&str>) {
        match name.rsplit_once('@') {
            Some((root, lang))
                if lang.len() == 2 && lang.chars().all(|c| c.is_ascii_lowercase()) =>
            {
                (root, Some(lang))
            }
            _ => (name, None),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub(crate) sources: Vec<(usize, Schema)>,
    pub(crate) global: Meta,
    pub(crate) datasets: Vec<Dataset>,
    pub(crate) resources: Vec<Resource>,
    pub(crate) bases: Vec<Base>,
    pub(crate) models: Vec<Model>,
    pub(crate) properties: Vec<Property>,
    pub(crate) dataset_index: BTreeMap<String, DatasetId>,
    pub(crate) model_index: BTreeMap<String, ModelId>,
    /// Models without a dataset, in declaration order
    pub(crate) global_models: Vec<ModelId>,
    pub(crate) linked: bool,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() && self.models.is_empty() && self.global.is_empty()
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Schema items the manifest was built from
    pub fn sources(&self) -> &[(usize, Schema)] {
        &self.sources
    }

    pub fn global_meta(&self) -> &Meta {
        &self.global
    }

    pub fn datasets(&self) -> impl Iterator<Item = (DatasetId, &Dataset)> {
        self.datasets.iter().enumerate().map(|(i, d)| (DatasetId(i), d))
    }

    pub fn dataset(&self, id: DatasetId) -> &Dataset {
        &self.datasets[id.0]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.0]
    }

    pub fn base(&self, id: BaseId) -> &Base {
        &self.bases[id.0]
    }

    pub fn model(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub fn property(&self, id: PropertyId) -> &Property {
        &self.properties[id.0]
    }

    /// Annotation access; names and links stay as loaded
    pub fn dataset_mut(&mut self, id: DatasetId) -> &mut Dataset {
        &mut self.datasets[id.0]
    }

    pub fn property_mut(&mut self, id: PropertyId) -> &mut Property {
        &mut self.properties[id.0]
    }

    pub fn get_dataset(&self, name: &str) -> Option<DatasetId> {
        self.dataset_index.get(name.trim_matches('/')).copied()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.model_index.contains_key(name.trim_start_matches('/'))
    }

    pub fn get_model(&self, name: &str) -> Result<ModelId, ManifestError> {
        self.model_index
            .get(name.trim_start_matches('/'))
            .copied()
            .ok_or_else(|| ManifestError::ModelNotFound(name.to_string()))
    }

    /// All models in declaration order
    pub fn get_models(&self) -> impl Iterator<Item = (ModelId, &Model)> {
        self.models.iter().enumerate().map(|(i, m)| (ModelId(i), m))
    }

    /// Models without a dataset
    pub fn global_models(&self) -> &[ModelId] {
        &self.global_models
    }

    /// Resolve a model name written inside `dataset`: relative first,
    /// then absolute
    pub fn resolve_model(&self, name: &str, dataset: Option<DatasetId>) -> Option<ModelId> {
        if let Some(absolute) = name.strip_prefix('/') {
            return self.model_index.get(absolute).copied();
        }
        if let Some(dataset) = dataset {
            let relative = format!("{}/{}", self.dataset(dataset).name, name);
            if let Some(id) = self.model_index.get(&relative) {
                return Some(*id);
            }
        }
        self.model_index.get(name).copied()
    }

    pub fn find_property(&self, model: ModelId, name: &str) -> Option<PropertyId> {
        self.model(model)
            .properties
            .iter()
            .copied()
            .find(|p| self.property(*p).name == name)
    }

    pub fn get_property(&self, model: ModelId, name: &str) -> Result<PropertyId, ManifestError> {
        self.find_property(model, name)
            .ok_or_else(|| ManifestError::PropertyNotFound {
                model: self.model(model).name.clone(),
                property: name.to_string(),
                row: None,
            })
    }

    /// Ancestors of a node, innermost first, the node itself included
    pub fn chain(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut chain = vec![node];
        let mut current = node;
        loop {
            let parent = match current {
                NodeRef::Property(id) => Some(NodeRef::Model(self.property(id).model)),
                NodeRef::Model(id) => {
                    let model = self.model(id);
                    model
                        .resource
                        .map(NodeRef::Resource)
                        .or(model.dataset.map(NodeRef::Dataset))
                }
                NodeRef::Resource(id) => self.resource(id).dataset.map(NodeRef::Dataset),
                NodeRef::Base(id) => self.base(id).dataset.map(NodeRef::Dataset),
                NodeRef::Dataset(_) => None,
            };
            match parent {
                Some(parent) => {
                    chain.push(parent);
                    current = parent;
                }
                None => return chain,
            }
        }
    }

    pub fn attrs(&self, node: NodeRef) -> &Attrs {
        match node {
            NodeRef::Dataset(id) => &self.dataset(id).attrs,
            NodeRef::Resource(id) => &self.resource(id).attrs,
            NodeRef::Base(id) => &self.base(id).attrs,
            NodeRef::Model(id) => &self.model(id).attrs,
            NodeRef::Property(id) => &self.property(id).attrs,
        }
    }

    pub fn key(&self, node: NodeRef) -> &NodeKey {
        match node {
            NodeRef::Dataset(id) => &self.dataset(id).key,
            NodeRef::Resource(id) => &self.resource(id).key,
            NodeRef::Base(id) => &self.base(id).key,
            NodeRef::Model(id) => &self.model(id).key,
            NodeRef::Property(id) => &self.property(id).key,
        }
    }

    /// Minimum of the access given along the ancestor chain; `protected`
    /// when nothing in the chain sets it
    pub fn effective_access(&self, node: NodeRef) -> Access {
        Access::effective(self.chain(node).into_iter().map(|n| self.attrs(n).access))
    }

    /// Prefixes visible from a dataset: its own, then global ones
    pub fn prefix_uri(&self, dataset: Option<DatasetId>, prefix: &str) -> Option<&str> {
        dataset
            .into_iter()
            .flat_map(|d| self.dataset(d).meta.prefixes.iter())
            .chain(self.global.prefixes.iter())
            .find(|p| p.name == prefix)
            .map(|p| p.uri.as_str())
    }

    /// Models of a dataset that are not bound to a resource
    pub fn dataset_models_without_resource(&self, dataset: DatasetId) -> Vec<ModelId> {
        self.dataset(dataset)
            .models
            .iter()
            .copied()
            .filter(|m| self.model(*m).resource.is_none())
            .collect()
    }
}
