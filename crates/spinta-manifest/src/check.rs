//! Structural validation of a linked manifest

use std::collections::BTreeSet;

use crate::error::ManifestError;
use crate::manifest::{Manifest, ModelId};
use crate::schema::Meta;

/// Validate a linked manifest. Returns the first problem found.
pub fn check(manifest: &Manifest) -> Result<(), ManifestError> {
    if !manifest.is_linked() {
        return Err(ManifestError::tabular(0, "manifest must be linked before it is checked"));
    }

    check_enums(&manifest.global, 0)?;
    for (_, dataset) in manifest.datasets() {
        check_enums(&dataset.meta, dataset.key.eid)?;
    }

    for (id, model) in manifest.get_models() {
        check_enums(&model.meta, model.key.eid)?;
        check_uniques(manifest, id)?;

        for pid in &model.properties {
            let property = manifest.property(*pid);
            check_enums(&property.meta, property.key.eid)?;

            if property.dtype.kind.is_reference() && property.ref_model.is_none() {
                return Err(ManifestError::MissingRefModel {
                    row: property.key.eid,
                    model: model.name.clone(),
                    property: property.name.clone(),
                    target: property.ref_.model().unwrap_or_default().to_string(),
                });
            }

            for lang in &property.langs {
                let variant = manifest.property(*lang);
                if variant.model != id {
                    return Err(ManifestError::tabular(
                        variant.key.eid,
                        format!("language variant '{}' belongs to another model", variant.name),
                    ));
                }
            }
        }

        if let Some(base) = model.base {
            let base = manifest.base(base);
            for pk in &base.pk {
                if manifest.find_property(id, pk).is_none() {
                    return Err(ManifestError::PropertyNotFound {
                        model: model.name.clone(),
                        property: pk.clone(),
                        row: Some(model.key.eid),
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_enums(meta: &Meta, eid: usize) -> Result<(), ManifestError> {
    for def in &meta.enums {
        let mut seen = BTreeSet::new();
        for item in &def.items {
            let key = match &item.prepare {
                Some(prepare) => spinta_spyna::unparse(prepare),
                None => item.source.clone(),
            };
            if !seen.insert(key.clone()) {
                return Err(ManifestError::InvalidValue {
                    row: eid,
                    field: "enum".into(),
                    value: key,
                    message: format!("duplicate item in enum '{}'", def.name),
                });
            }
        }
    }
    Ok(())
}

fn check_uniques(manifest: &Manifest, model: ModelId) -> Result<(), ManifestError> {
    let node = manifest.model(model);
    for unique in &node.meta.uniques {
        for name in &unique.properties {
            if manifest.find_property(model, name).is_none() {
                return Err(ManifestError::PropertyNotFound {
                    model: node.name.clone(),
                    property: name.clone(),
                    row: Some(node.key.eid),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::link;
    use crate::load::{load_nodes, LoadOptions};
    use crate::tabular::read_tabular_str;

    fn loaded(csv: &str) -> Manifest {
        let mut manifest = Manifest::new();
        load_nodes(&mut manifest, read_tabular_str(csv).unwrap(), &LoadOptions::default()).unwrap();
        manifest
    }

    #[test]
    fn test_check_requires_link() {
        let manifest = loaded("dataset\nds\n");
        assert!(check(&manifest).is_err());
    }

    #[test]
    fn test_enum_without_level_passes() {
        let mut manifest = loaded(
            "model,property,type,ref,source,prepare,level\n\
             Side,,,,,,\n\
             ,side,string,,,,\n\
             ,,enum,,l,'left',\n\
             ,,,,r,'right',\n",
        );
        link(&mut manifest).unwrap();
        check(&manifest).unwrap();
    }

    #[test]
    fn test_duplicate_enum_item() {
        let mut manifest = loaded(
            "model,property,type,ref,source,prepare\n\
             Side,,,,,\n\
             ,side,string,,,\n\
             ,,enum,,l,'left'\n\
             ,,,,r,'left'\n",
        );
        link(&mut manifest).unwrap();
        assert!(matches!(
            check(&manifest),
            Err(ManifestError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_unique_on_unknown_property() {
        let mut manifest = loaded(
            "model,property,type,ref\n\
             City,,,\n\
             ,,unique,\"name, code\"\n\
             ,name,string,\n",
        );
        link(&mut manifest).unwrap();
        assert!(matches!(
            check(&manifest),
            Err(ManifestError::PropertyNotFound { .. })
        ));
    }
}
