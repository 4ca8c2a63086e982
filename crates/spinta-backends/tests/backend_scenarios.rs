//! Backends loaded from configuration and driven through a manifest

use serde_json::json;
use spinta_backends::{
    apply_pii, detect_pii, getall, inspect, Backend, BackendError, Backends, DialectRegistry,
    GetAllOptions, InspectOptions, PiiKind, SqliteBackend,
};
use spinta_core::{BackendConfig, Config, ErrorCode, Reportable};
use spinta_keymap::SqlKeyMap;
use spinta_manifest::{
    datasets_to_tabular, load_manifest_str, used_columns, write_tabular_string, Column, RenderOptions,
};
use tempfile::TempDir;

const MANIFEST: &str = "\
dataset,resource,model,property,type,ref,source
datasets/gov/people,,,,,,
,db,,,sql,default,
,,Person,,,code,asmenys
,,,code,string,,asmens_kodas
,,,name,string,,vardas
,,,email,string,,el_pastas
,,,phone,string,,telefonas
";

/// Helper: file database with a few rows, loaded through the config
fn load_backends(dir: &TempDir) -> Backends {
    let path = dir.path().join("data.db");
    let setup = SqliteBackend::load(
        "setup",
        &BackendConfig::new("sql/sqlite", format!("sqlite:///{}", path.display())),
        std::sync::Arc::new(spinta_backends::dialect::SqliteDialect),
    )
    .unwrap();
    setup
        .execute_batch(
            "CREATE TABLE asmenys (asmens_kodas TEXT PRIMARY KEY, vardas TEXT,
                                   el_pastas TEXT, telefonas TEXT);
             INSERT INTO asmenys VALUES
                ('38703181745', 'Jonas', 'jonas@example.lt', '+37061234567'),
                ('33309240064', 'Ona', 'ona@example.lt', '+37069876543');",
        )
        .unwrap();

    let mut config = Config::default();
    config.backends.insert(
        "default".into(),
        BackendConfig::new("sql", format!("sqlite:///{}", path.display())),
    );
    Backends::load(&config, &DialectRegistry::with_defaults()).unwrap()
}

#[test]
fn test_prepare_and_getall_through_config() {
    let dir = TempDir::new().unwrap();
    let backends = load_backends(&dir);
    let manifest = load_manifest_str(MANIFEST).unwrap();
    backends.prepare(&manifest).unwrap();

    let person = manifest.get_model("datasets/gov/people/Person").unwrap();
    let backend = backends.for_model(&manifest, person).unwrap();
    assert!(backend.wait(true).unwrap());

    let keymap = SqlKeyMap::open_in_memory().unwrap();
    let options = GetAllOptions {
        sort: spinta_backends::parse_sort("-name").unwrap(),
        limit: Some(1),
        ..GetAllOptions::default()
    };
    let rows = getall(backend.as_ref(), &manifest, person, &keymap, &options).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Ona"));
    assert_eq!(rows[0]["_type"], json!("datasets/gov/people/Person"));
    assert!(rows[0]["_id"].is_string());

    // Same natural key, same surrogate key
    let again = getall(backend.as_ref(), &manifest, person, &keymap, &options).unwrap();
    assert_eq!(again[0]["_id"], rows[0]["_id"]);
}

#[test]
fn test_pii_detection_tags_properties() {
    let dir = TempDir::new().unwrap();
    let backends = load_backends(&dir);
    let mut manifest = load_manifest_str(MANIFEST).unwrap();
    let backend = backends.get("default").unwrap();

    let found = detect_pii(&manifest, backend.as_ref(), 10).unwrap();
    let mut kinds: Vec<(String, PiiKind)> = found
        .iter()
        .map(|m| (manifest.property(m.property).name.clone(), m.kind))
        .collect();
    kinds.sort();
    assert_eq!(
        kinds,
        vec![
            ("code".to_string(), PiiKind::PersonalCode),
            ("email".to_string(), PiiKind::Email),
            ("phone".to_string(), PiiKind::Phone),
        ]
    );

    apply_pii(&mut manifest, &found);
    let rows = datasets_to_tabular(&manifest, &RenderOptions::default());
    let csv = write_tabular_string(&rows, &used_columns(&rows)).unwrap();
    assert!(csv.contains("prefix,pii"));
    assert!(csv.contains("pii:email"));
    let name = rows.iter().find(|r| r.get(Column::Property) == "name").unwrap();
    assert_eq!(name.get(Column::Uri), "");
}

#[test]
fn test_inspect_round_trips_through_manifest() {
    let dir = TempDir::new().unwrap();
    let backends = load_backends(&dir);
    let backend = backends.get("default").unwrap();
    let rows = inspect(
        backend.as_ref(),
        &InspectOptions {
            dataset: "datasets/gov/people".into(),
            dsn: "sqlite://".into(),
            ..InspectOptions::default()
        },
    )
    .unwrap();
    let csv = write_tabular_string(&rows, &used_columns(&rows)).unwrap();
    let manifest = load_manifest_str(&csv).unwrap();
    let model = manifest.get_model("datasets/gov/people/Asmenys").unwrap();
    assert_eq!(manifest.model(model).external, "asmenys");
    assert_eq!(manifest.model(model).pkeys, vec!["asmens_kodas".to_string()]);
}

#[test]
fn test_missing_table_is_reported_on_read() {
    let backend = SqliteBackend::open_in_memory("default").unwrap();
    let manifest = load_manifest_str(MANIFEST).unwrap();
    // prepare only warns about missing source tables
    backend.prepare(&manifest).unwrap();

    let err = backend
        .get_table(&spinta_backends::TableName::new("asmenys"))
        .unwrap_err();
    assert!(matches!(err, BackendError::TableNotFound(_)));
    assert_eq!(err.code(), ErrorCode::BackendError);
    assert_eq!(err.context()["table"], json!("asmenys"));
}
