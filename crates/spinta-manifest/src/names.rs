//! `--format-names`: model names in `UpperCamelCase`, property names in
//! `snake_case`. Dataset paths are kept as they are.

use crate::manifest::Property;
use crate::schema::{Meta, RefSpec, Schema};

pub fn format_names(schemas: &mut [(usize, Schema)]) {
    for (_, schema) in schemas.iter_mut() {
        match schema {
            Schema::Base(base) => {
                base.name = model_name(&base.name);
                base.pk = base.pk.iter().map(|p| property_name(p)).collect();
            }
            Schema::Model(model) => {
                model.name = model_name(&model.name);
                model.base = model.base.as_deref().map(model_name);
                model.pkeys = model.pkeys.iter().map(|p| property_name(p)).collect();
                format_meta(&mut model.meta);
                for property in &mut model.properties {
                    property.name = property_name(&property.name);
                    if let RefSpec::Model { model, refprops } = &mut property.ref_ {
                        *model = model_name(model);
                        *refprops = refprops.iter().map(|p| property_name(p)).collect();
                    }
                }
            }
            _ => {}
        }
    }
}

fn format_meta(meta: &mut Meta) {
    for unique in &mut meta.uniques {
        unique.properties = unique.properties.iter().map(|p| property_name(p)).collect();
    }
}

/// Only the last path segment is a model name
pub fn model_name(name: &str) -> String {
    match name.rsplit_once('/') {
        Some((path, model)) => format!("{}/{}", path, to_upper_camel(model)),
        None => to_upper_camel(name),
    }
}

pub fn property_name(name: &str) -> String {
    match Property::split_lang(name) {
        (root, Some(lang)) => format!("{}@{}", to_snake(root), lang),
        (root, None) => to_snake(root),
    }
}

fn words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();
    for (i, c) in chars.iter().copied().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let boundary = c.is_uppercase()
            && !current.is_empty()
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_numeric()
                || chars.get(i + 1).is_some_and(|n| n.is_lowercase()));
        if boundary {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn to_upper_camel(name: &str) -> String {
    words(name)
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect(),
                None => String::new(),
            }
        })
        .collect()
}

fn to_snake(name: &str) -> String {
    words(name)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}
