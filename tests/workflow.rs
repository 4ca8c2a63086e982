//! The umbrella crate wires the workspace together

use spinta::keymap::{KeyMap, KeyValue, SqlKeyMap};
use spinta::{load_manifest_str, ErrorCode, ErrorReport};
use spinta_core::Reportable;

const MANIFEST: &str = "\
dataset,model,property,type,ref
datasets/gov/example,,,,
,Country,,,code
,,code,string,
";

#[test]
fn test_missing_model_is_reported_as_json() {
    let manifest = load_manifest_str(MANIFEST).unwrap();
    assert!(manifest.has_model("datasets/gov/example/Country"));

    let err = manifest.get_model("datasets/gov/example/City").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModelNotFound);

    let json: serde_json::Value = serde_json::from_str(&ErrorReport::from_error(&err).to_json()).unwrap();
    assert_eq!(json["errors"][0]["code"], "ModelNotFound");
}

#[test]
fn test_keys_survive_reopening_the_keymap() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = spinta::core::KeymapConfig {
        dsn: format!("sqlite:///{}", dir.path().join("keymap.db").display()),
        ..Default::default()
    };

    let key = {
        let keymap = SqlKeyMap::open(&config, false).unwrap();
        keymap
            .encode("datasets/gov/example/Country", &KeyValue::Str("lt".into()), None)
            .unwrap()
            .unwrap()
    };

    let keymap = SqlKeyMap::open(&config, false).unwrap();
    let again = keymap
        .encode("datasets/gov/example/Country", &KeyValue::Str("lt".into()), None)
        .unwrap();
    assert_eq!(again.as_deref(), Some(key.as_str()));
    assert_eq!(keymap.decode("datasets/gov/example/Country", &key).unwrap(), "lt");
}
