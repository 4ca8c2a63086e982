//! Schema items produced by the tabular reader
//!
//! The reader turns rows into a flat sequence of `(row, Schema)` pairs.
//! Meta rows are folded into the item that encloses them, so a
//! [`ModelSchema`] arrives with its properties and every property with its
//! enums, translations and comments.

use spinta_core::{Access, Level};
use spinta_spyna::Expr;

use crate::dtype::Dtype;

/// Attributes every structural row carries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attrs {
    pub title: String,
    pub description: String,
    pub level: Option<Level>,
    pub access: Option<Access>,
    pub status: String,
    pub visibility: String,
    pub uri: String,
    pub eli: String,
    pub origin: String,
    pub count: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefixDef {
    pub id: Option<String>,
    pub name: String,
    pub uri: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumItem {
    pub id: Option<String>,
    pub source: String,
    pub prepare: Option<Expr>,
    pub access: Option<Access>,
    pub title: String,
    pub description: String,
}

/// Named value set; an unnamed enum belongs to the property it follows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumDef {
    pub id: Option<String>,
    pub name: String,
    pub items: Vec<EnumItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LangDef {
    pub id: Option<String>,
    pub lang: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentDef {
    pub id: Option<String>,
    pub author: String,
    pub access: Option<Access>,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamItem {
    pub id: Option<String>,
    pub source: String,
    pub prepare: Option<Expr>,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDef {
    pub id: Option<String>,
    pub name: String,
    pub items: Vec<ParamItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NsDef {
    pub id: Option<String>,
    pub name: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniqueDef {
    pub id: Option<String>,
    pub properties: Vec<String>,
}

/// Meta rows attached to one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub namespaces: Vec<NsDef>,
    pub prefixes: Vec<PrefixDef>,
    pub enums: Vec<EnumDef>,
    pub langs: Vec<LangDef>,
    pub comments: Vec<CommentDef>,
    pub params: Vec<ParamDef>,
    pub uniques: Vec<UniqueDef>,
}

impl Meta {
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
            && self.prefixes.is_empty()
            && self.enums.is_empty()
            && self.langs.is_empty()
            && self.comments.is_empty()
            && self.params.is_empty()
            && self.uniques.is_empty()
    }

    pub fn extend(&mut self, other: Meta) {
        self.namespaces.extend(other.namespaces);
        self.prefixes.extend(other.prefixes);
        self.enums.extend(other.enums);
        self.langs.extend(other.langs);
        self.comments.extend(other.comments);
        self.params.extend(other.params);
        self.uniques.extend(other.uniques);
    }
}

/// Target of a property `ref` cell
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RefSpec {
    #[default]
    None,
    /// `Model`, `Model[a, b]` or `filter(Model, [a, b])`
    Model { model: String, refprops: Vec<String> },
    /// Anything else, e.g. the name of an enum
    Raw(String),
}

impl RefSpec {
    pub fn model(&self) -> Option<&str> {
        match self {
            RefSpec::Model { model, .. } => Some(model.as_str()),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, RefSpec::None)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSchema {
    pub id: Option<String>,
    pub name: String,
    pub attrs: Attrs,
    pub meta: Meta,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSchema {
    pub id: Option<String>,
    pub dataset: Option<String>,
    pub name: String,
    /// Resource type, e.g. `sql/sqlite`
    pub kind: String,
    /// Named backend configured outside the manifest
    pub backend: String,
    /// DSN, URL or path
    pub external: String,
    pub prepare: Option<Expr>,
    pub attrs: Attrs,
    pub meta: Meta,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseSchema {
    pub id: Option<String>,
    pub dataset: Option<String>,
    /// Absolute name of the base model
    pub name: String,
    /// Properties identifying the base model
    pub pk: Vec<String>,
    pub attrs: Attrs,
    pub meta: Meta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub id: Option<String>,
    pub eid: usize,
    pub name: String,
    pub dtype: Dtype,
    pub ref_: RefSpec,
    pub external: String,
    pub source_type: String,
    pub prepare: Option<Expr>,
    pub attrs: Attrs,
    pub meta: Meta,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSchema {
    pub id: Option<String>,
    pub dataset: Option<String>,
    pub resource: Option<String>,
    /// Absolute name of the base in effect when the model was declared
    pub base: Option<String>,
    /// Absolute model name, `dataset/Model`
    pub name: String,
    pub pkeys: Vec<String>,
    /// Source table
    pub external: String,
    pub prepare: Option<Expr>,
    pub attrs: Attrs,
    pub meta: Meta,
    pub properties: Vec<PropertySchema>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Meta rows declared before any dataset or model
    Global(Meta),
    Dataset(DatasetSchema),
    Resource(ResourceSchema),
    Base(BaseSchema),
    Model(ModelSchema),
}

impl Schema {
    pub fn kind(&self) -> &'static str {
        match self {
            Schema::Global(_) => "global",
            Schema::Dataset(_) => "dataset",
            Schema::Resource(_) => "resource",
            Schema::Base(_) => "base",
            Schema::Model(_) => "model",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Schema::Global(_) => "",
            Schema::Dataset(s) => &s.name,
            Schema::Resource(s) => &s.name,
            Schema::Base(s) => &s.name,
            Schema::Model(s) => &s.name,
        }
    }

    /// Dataset the item belongs to
    pub fn dataset(&self) -> Option<&str> {
        match self {
            Schema::Global(_) => None,
            Schema::Dataset(s) => Some(&s.name),
            Schema::Resource(s) => s.dataset.as_deref(),
            Schema::Base(s) => s.dataset.as_deref(),
            Schema::Model(s) => s.dataset.as_deref(),
        }
    }
}
