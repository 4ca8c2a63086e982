use std::collections::BTreeMap;

use crate::manifest::{Manifest, ModelId};

/// Old model name to its renames: `""` maps to the new model name when
/// the model itself was renamed, other keys are renamed properties.
pub type RenameMapping = BTreeMap<String, BTreeMap<String, String>>;

/// `rename_mapping(old, new, dataset)`: structural diff of one dataset by
/// node id
pub fn rename_mapping(old: &Manifest, new: &Manifest, dataset: &str) -> RenameMapping {
    let mut mapping = RenameMapping::new();
    let Some(old_dataset) = old.get_dataset(dataset) else {
        return mapping;
    };

    let new_models: BTreeMap<&str, ModelId> = new
        .get_models()
        .map(|(id, model)| (model.key.id.as_str(), id))
        .collect();

    for model_id in &old.dataset(old_dataset).models {
        let model = old.model(*model_id);
        let Some(new_id) = new_models.get(model.key.id.as_str()) else {
            continue;
        };
        let renamed = new.model(*new_id);

        let mut entry = BTreeMap::new();
        if renamed.name != model.name {
            entry.insert(String::new(), renamed.name.clone());
        }

        for pid in &model.properties {
            let property = old.property(*pid);
            if property.inherited || property.synthetic {
                continue;
            }
            let counterpart = renamed
                .properties
                .iter()
                .map(|p| new.property(*p))
                .find(|p| p.key.id == property.key.id);
            if let Some(counterpart) = counterpart {
                if counterpart.name != property.name {
                    entry.insert(property.name.clone(), counterpart.name.clone());
                }
            }
        }

        if !entry.is_empty() {
            mapping.insert(model.name.clone(), entry);
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::link;
    use crate::load::{load_nodes, LoadOptions};
    use crate::tabular::read_tabular_str;

    const M1: &str = "aaaaaaaa-0000-4000-8000-000000000001";
    const M2: &str = "aaaaaaaa-0000-4000-8000-000000000002";
    const P1: &str = "bbbbbbbb-0000-4000-8000-000000000001";
    const P2: &str = "bbbbbbbb-0000-4000-8000-000000000002";

    fn load(csv: &str) -> Manifest {
        let mut manifest = Manifest::new();
        load_nodes(&mut manifest, read_tabular_str(csv).unwrap(), &LoadOptions::default()).unwrap();
        link(&mut manifest).unwrap();
        manifest
    }

    #[test]
    fn test_rename_mapping() {
        let old = load(&format!(
            "id,dataset,model,property,type\n\
             ,geo,,,\n\
             {M1},,Country,,\n\
             {P1},,,name,string\n\
             {M2},,City,,\n\
             {P2},,,title,string\n"
        ));
        let new = load(&format!(
            "id,dataset,model,property,type\n\
             ,geo,,,\n\
             {M1},,State,,\n\
             {P1},,,name,string\n\
             {M2},,City,,\n\
             {P2},,,label,string\n"
        ));
        let mapping = rename_mapping(&old, &new, "geo");
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["geo/Country"][""], "geo/State");
        assert_eq!(mapping["geo/Country"].len(), 1);
        assert_eq!(mapping["geo/City"]["title"], "label");
        assert!(!mapping["geo/City"].contains_key(""));
    }

    #[test]
    fn test_unchanged_models_are_omitted() {
        let csv = format!("id,dataset,model,property,type\n,geo,,,\n{M1},,Country,,\n{P1},,,name,string\n");
        let old = load(&csv);
        let new = load(&csv);
        assert!(rename_mapping(&old, &new, "geo").is_empty());
    }
}
