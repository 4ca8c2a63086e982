//! Second pass over a loaded manifest
//!
//! Forward references are allowed while reading, so everything that
//! points at another node is resolved here: bases, `ref`/`backref`
//! targets and their `refprops`, compact URIs and primary keys.

use tracing::warn;

use crate::error::ManifestError;
use crate::manifest::{Manifest, ModelId, NodeKey, Property, PropertyId};
use crate::schema::RefSpec;

pub fn link(manifest: &mut Manifest) -> Result<(), ManifestError> {
    link_bases(manifest)?;
    install_base_pkeys(manifest)?;
    link_refs(manifest)?;
    expand_uris(manifest);
    link_pkeys(manifest)?;
    manifest.linked = true;
    Ok(())
}

fn link_bases(manifest: &mut Manifest) -> Result<(), ManifestError> {
    for i in 0..manifest.bases.len() {
        let base = &manifest.bases[i];
        let model = manifest.model_index.get(&base.name).copied().ok_or_else(|| {
            ManifestError::MissingRefModel {
                row: base.key.eid,
                model: base.name.clone(),
                property: String::new(),
                target: base.name.clone(),
            }
        })?;
        manifest.bases[i].model = Some(model);
    }
    Ok(())
}

/// Models under a base get the base's identifying properties unless they
/// declare them themselves
fn install_base_pkeys(manifest: &mut Manifest) -> Result<(), ManifestError> {
    for m in 0..manifest.models.len() {
        let Some(base) = manifest.models[m].base else {
            continue;
        };
        let base = manifest.bases[base.0].clone();
        let Some(base_model) = base.model else {
            continue;
        };
        if base_model == ModelId(m) {
            continue;
        }

        for pk in &base.pk {
            if manifest.find_property(ModelId(m), pk).is_some() {
                continue;
            }
            let source = manifest.find_property(base_model, pk).ok_or_else(|| {
                ManifestError::PropertyNotFound {
                    model: base.name.clone(),
                    property: pk.clone(),
                    row: Some(base.key.eid),
                }
            })?;
            let source = manifest.property(source).clone();
            let pid = PropertyId(manifest.properties.len());
            manifest.properties.push(Property {
                key: NodeKey::new(None, base.key.eid),
                model: ModelId(m),
                inherited: true,
                langs: Vec::new(),
                ref_model: None,
                refprop_ids: Vec::new(),
                ..source
            });
            manifest.models[m].properties.push(pid);
        }
    }
    Ok(())
}

fn link_refs(manifest: &mut Manifest) -> Result<(), ManifestError> {
    for p in 0..manifest.properties.len() {
        let property = &manifest.properties[p];
        if !property.dtype.kind.is_reference() {
            continue;
        }
        let model = property.model;
        let dataset = manifest.model(model).dataset;
        let missing = |target: &str| ManifestError::MissingRefModel {
            row: property.key.eid,
            model: manifest.model(model).name.clone(),
            property: property.name.clone(),
            target: target.to_string(),
        };

        let (target_name, refprops) = match &property.ref_ {
            RefSpec::Model { model, refprops } => (model.clone(), refprops.clone()),
            RefSpec::None => return Err(missing("")),
            RefSpec::Raw(raw) => return Err(missing(raw)),
        };
        let target = manifest
            .resolve_model(&target_name, dataset)
            .ok_or_else(|| missing(&target_name))?;

        let mut refprop_ids = Vec::with_capacity(refprops.len());
        for name in &refprops {
            let id = manifest.find_property(target, name).ok_or_else(|| {
                ManifestError::PropertyNotFound {
                    model: manifest.model(target).name.clone(),
                    property: name.clone(),
                    row: Some(property.key.eid),
                }
            })?;
            refprop_ids.push(id);
        }

        let property = &mut manifest.properties[p];
        property.ref_model = Some(target);
        property.refprop_ids = refprop_ids;
    }
    Ok(())
}

/// `locn:geographicName` becomes the prefix URI followed by the local name
fn expand_uris(manifest: &mut Manifest) {
    for m in 0..manifest.models.len() {
        let dataset = manifest.models[m].dataset;
        let resolved = expand(manifest, dataset, &manifest.models[m].attrs.uri);
        manifest.models[m].resolved_uri = resolved;
    }
    for p in 0..manifest.properties.len() {
        let dataset = manifest.model(manifest.properties[p].model).dataset;
        let resolved = expand(manifest, dataset, &manifest.properties[p].attrs.uri);
        manifest.properties[p].resolved_uri = resolved;
    }
}

fn expand(
    manifest: &Manifest,
    dataset: Option<crate::manifest::DatasetId>,
    uri: &str,
) -> Option<String> {
    if uri.is_empty() {
        return None;
    }
    if uri.contains("://") {
        return Some(uri.to_string());
    }
    match uri.split_once(':') {
        Some((prefix, local)) => match manifest.prefix_uri(dataset, prefix) {
            Some(base) => Some(format!("{}{}", base, local)),
            None => {
                warn!(uri, prefix, "unknown uri prefix");
                None
            }
        },
        None => None,
    }
}

fn link_pkeys(manifest: &mut Manifest) -> Result<(), ManifestError> {
    for m in 0..manifest.models.len() {
        let model = ModelId(m);
        let mut ids = Vec::new();
        for name in &manifest.models[m].pkeys {
            let id = manifest.find_property(model, name).ok_or_else(|| {
                ManifestError::PropertyNotFound {
                    model: manifest.models[m].name.clone(),
                    property: name.clone(),
                    row: Some(manifest.models[m].key.eid),
                }
            })?;
            ids.push(id);
        }
        manifest.models[m].pkey_ids = ids;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{load_nodes, LoadOptions};
    use crate::tabular::read_tabular_str;

    fn load(csv: &str) -> Result<Manifest, ManifestError> {
        let mut manifest = Manifest::new();
        load_nodes(&mut manifest, read_tabular_str(csv)?, &LoadOptions::default())?;
        link(&mut manifest)?;
        Ok(manifest)
    }

    #[test]
    fn test_forward_ref_across_datasets() {
        let manifest = load(
            "dataset,model,property,type,ref\n\
             a,,,,\n\
             ,City,,,\n\
             ,,country,ref,/b/Country\n\
             b,,,,\n\
             ,Country,,,code\n\
             ,,code,string,\n",
        )
        .unwrap();
        let city = manifest.get_model("a/City").unwrap();
        let country = manifest.get_property(city, "country").unwrap();
        assert_eq!(
            manifest.property(country).ref_model,
            Some(manifest.get_model("b/Country").unwrap())
        );
    }

    #[test]
    fn test_missing_ref_model() {
        let err = load(
            "dataset,model,property,type,ref\n\
             a,,,,\n\
             ,City,,,\n\
             ,,country,ref,Country\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingRefModel { row: 4, .. }));
    }

    #[test]
    fn test_unknown_refprop() {
        let err = load(
            "dataset,model,property,type,ref\n\
             a,,,,\n\
             ,Country,,,\n\
             ,,code,string,\n\
             ,City,,,\n\
             ,,country,ref,\"Country[iso]\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::PropertyNotFound { .. }));
    }

    #[test]
    fn test_unknown_pkey() {
        let err = load("dataset,model,property,type,ref\na,,,,\n,Country,,,iso\n,,code,string,\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::PropertyNotFound { .. }));
    }

    #[test]
    fn test_base_pkey_is_installed() {
        let manifest = load(
            "dataset,base,model,property,type,ref\n\
             geo,,,,,\n\
             ,,Location,,,id\n\
             ,,,id,integer,\n\
             ,Location,,,,id\n\
             ,,City,,,id\n\
             ,,,name,string,\n",
        )
        .unwrap();
        let city = manifest.get_model("geo/City").unwrap();
        let id = manifest.get_property(city, "id").unwrap();
        assert!(manifest.property(id).inherited);
        assert_eq!(manifest.model(city).pkey_ids, vec![id]);
    }

    #[test]
    fn test_uri_prefix_expansion() {
        let manifest = load(
            "dataset,model,property,type,ref,uri\n\
             geo,,,,,\n\
             ,,,prefix,locn,http://www.w3.org/ns/locn#\n\
             ,Place,,,,locn:Location\n\
             ,,name,string,,locn:geographicName\n",
        )
        .unwrap();
        let place = manifest.get_model("geo/Place").unwrap();
        assert_eq!(
            manifest.model(place).resolved_uri.as_deref(),
            Some("http://www.w3.org/ns/locn#Location")
        );
        let name = manifest.get_property(place, "name").unwrap();
        assert_eq!(
            manifest.property(name).resolved_uri.as_deref(),
            Some("http://www.w3.org/ns/locn#geographicName")
        );
    }

    #[test]
    fn test_link_twice() {
        let mut manifest = Manifest::new();
        let csv = "dataset,base,model,property,type,ref\n\
                   geo,,,,,\n\
                   ,,Location,,,id\n\
                   ,,,id,integer,\n\
                   ,Location,,,,id\n\
                   ,,City,,,id\n";
        load_nodes(&mut manifest, read_tabular_str(csv).unwrap(), &LoadOptions::default()).unwrap();
        link(&mut manifest).unwrap();
        link(&mut manifest).unwrap();
        let city = manifest.get_model("geo/City").unwrap();
        assert_eq!(manifest.model(city).properties.len(), 1);
    }
}
