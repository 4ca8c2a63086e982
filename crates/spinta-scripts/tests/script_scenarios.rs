//! Built-in scripts run through the registry against real stores

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::json;
use spinta_backends::{Backend, Backends, SqliteBackend, TableName};
use spinta_core::{Config, Context, KeymapConfig, BACKENDS, KEYMAP, MANIFEST};
use spinta_keymap::{schema, KeyMap, SqlKeyMap};
use spinta_manifest::load_manifest_str;
use spinta_scripts::{
    format_report, model_limits, run_scripts, ClientStore, RunOptions, ScriptRegistry,
    ScriptStatus, ScriptType, StatusCache,
};
use tempfile::TempDir;

const MANIFEST_CSV: &str = "\
model,property,type,ref
Country,,,code
,code,string,
,name,string,
City,,,
,name,string,
,country,ref,Country
";

fn context(dir: &TempDir) -> Context {
    let config = Config {
        config_path: dir.path().to_path_buf(),
        ..Config::default()
    };
    Context::new(config).with_upgrade_mode(true)
}

/// Helper: context with the manifest, an in-memory backend and a file keymap
fn backend_context(dir: &TempDir) -> (Context, Arc<dyn Backend>) {
    let ctx = context(dir);
    let backend: Arc<dyn Backend> = Arc::new(SqliteBackend::open_in_memory("default").unwrap());
    let mut backends = Backends::new("default");
    backends.insert(Arc::clone(&backend));

    let dsn = format!("sqlite:///{}", dir.path().join("keymap.db").display());
    let keymap = SqlKeyMap::open(&KeymapConfig { dsn, ..KeymapConfig::default() }, true).unwrap();

    ctx.attach_value(MANIFEST, load_manifest_str(MANIFEST_CSV).unwrap());
    ctx.attach_value(BACKENDS, backends);
    ctx.attach_value(KEYMAP, keymap);
    (ctx, backend)
}

fn run(ctx: &Context, script_type: ScriptType, names: &[&str]) -> Vec<(String, ScriptStatus, bool)> {
    let registry = ScriptRegistry::with_defaults().unwrap();
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let mut cache = StatusCache::default();
    run_scripts(ctx, &registry, script_type, &names, &RunOptions::default(), &mut cache)
        .unwrap()
        .into_iter()
        .map(|r| (r.key.name.clone(), r.status, r.failed()))
        .collect()
}

#[test]
fn test_registry_holds_every_script() {
    let registry = ScriptRegistry::with_defaults().unwrap();
    let upgrade: Vec<_> = registry.of_type(ScriptType::Upgrade).map(|s| s.name()).collect();
    assert_eq!(
        upgrade,
        vec![
            "clients",
            "deduplicate",
            "new_columns",
            "postgresql_schemas",
            "redirect",
            "sql_keymap_initial",
            "sql_keymap_redirect"
        ]
    );
    let admin: Vec<_> = registry.of_type(ScriptType::Admin).map(|s| s.name()).collect();
    assert_eq!(admin, vec!["changelog", "model_limit"]);
}

#[test]
fn test_clients_migration() {
    let dir = TempDir::new().unwrap();
    let clients = dir.path().join("clients");
    fs::create_dir_all(&clients).unwrap();
    fs::write(
        clients.join("TEST.yml"),
        "client_id: TEST\nclient_secret_hash: secret\nscopes:\n  - spinta_getall\n",
    )
    .unwrap();
    let ctx = context(&dir);

    let first = run(&ctx, ScriptType::Upgrade, &["clients"]);
    assert_eq!(first, vec![("clients".to_string(), ScriptStatus::Required, false)]);

    let keymap: BTreeMap<String, String> =
        serde_yaml::from_str(&fs::read_to_string(clients.join("helpers/keymap.yml")).unwrap()).unwrap();
    let id = &keymap["TEST"];
    assert!(uuid::Uuid::parse_str(id).is_ok());

    let store = ClientStore::new(&clients);
    assert!(store.client_path(id).is_file());
    let client = store.get_by_name("TEST").unwrap();
    assert_eq!(client.client_name, "TEST");
    assert_eq!(client.scopes, vec!["spinta_getall".to_string()]);

    let registry = ScriptRegistry::with_defaults().unwrap();
    let reports = run_scripts(
        &ctx,
        &registry,
        ScriptType::Upgrade,
        &["clients".to_string()],
        &RunOptions::default(),
        &mut StatusCache::default(),
    )
    .unwrap();
    assert_eq!(format_report(&reports), "clients: PASSED");
}

#[test]
fn test_redirect_tables_created_once() {
    let dir = TempDir::new().unwrap();
    let (ctx, backend) = backend_context(&dir);

    let first = run(&ctx, ScriptType::Upgrade, &["redirect"]);
    assert_eq!(first, vec![("redirect".to_string(), ScriptStatus::Required, false)]);

    let ddl = backend.ddl().unwrap();
    assert!(ddl.table_exists(&TableName::new("Country/:redirect")).unwrap());
    assert!(ddl.table_exists(&TableName::new("City/:redirect")).unwrap());

    let second = run(&ctx, ScriptType::Upgrade, &["redirect"]);
    assert_eq!(second, vec![("redirect".to_string(), ScriptStatus::Passed, false)]);
}

#[test]
fn test_new_columns_widen_existing_tables() {
    let dir = TempDir::new().unwrap();
    let (ctx, backend) = backend_context(&dir);
    let mut tx = backend.begin().unwrap();
    tx.execute(
        "CREATE TABLE \"Country\" (\"_id\" TEXT PRIMARY KEY, \"_revision\" TEXT, \"code\" TEXT)",
        &[],
    )
    .unwrap();
    tx.commit().unwrap();

    let first = run(&ctx, ScriptType::Upgrade, &["new_columns"]);
    assert_eq!(first, vec![("new_columns".to_string(), ScriptStatus::Required, false)]);
    let country = backend.get_table(&TableName::new("Country")).unwrap();
    assert!(country.column("name").is_some());
    // City has no table yet
    assert!(!backend.ddl().unwrap().table_exists(&TableName::new("City")).unwrap());

    let second = run(&ctx, ScriptType::Upgrade, &["new_columns"]);
    assert_eq!(second, vec![("new_columns".to_string(), ScriptStatus::Passed, false)]);
}

#[test]
fn test_deduplicate_then_changelog() {
    let dir = TempDir::new().unwrap();
    let (ctx, backend) = backend_context(&dir);
    let keymap = ctx.get::<SqlKeyMap>(KEYMAP).unwrap();
    let key = keymap.encode("Country", &"lt".into(), None).unwrap().unwrap();
    Connection::open(dir.path().join("keymap.db"))
        .unwrap()
        .execute(
            "INSERT INTO \"Country\" (key, value, redirect, modified_at)
             VALUES ('old', '\"lt\"', NULL, '2024-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

    let reports = run(&ctx, ScriptType::Upgrade, &["redirect", "deduplicate"]);
    assert_eq!(
        reports,
        vec![
            ("redirect".to_string(), ScriptStatus::Required, false),
            ("deduplicate".to_string(), ScriptStatus::Required, false),
        ]
    );
    assert_eq!(keymap.decode_redirect("Country", &key).unwrap(), "old");
    assert!(keymap.duplicate_keys("Country").unwrap().is_empty());

    let mut tx = backend.begin().unwrap();
    let rows = tx
        .query("SELECT \"_id\", \"redirect\" FROM \"Country/:redirect\"", &[])
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["_id"], json!(key));
    assert_eq!(rows[0]["redirect"], json!("old"));

    let admin = run(&ctx, ScriptType::Admin, &["changelog"]);
    assert_eq!(admin, vec![("changelog".to_string(), ScriptStatus::Required, false)]);
    let ddl = backend.ddl().unwrap();
    assert!(ddl.table_exists(&TableName::new("Country/:changelog")).unwrap());

    let again = run(&ctx, ScriptType::Admin, &["changelog"]);
    assert_eq!(again, vec![("changelog".to_string(), ScriptStatus::Passed, false)]);
}

#[test]
fn test_failed_deduplicate_leaves_keymap_for_retry() {
    let dir = TempDir::new().unwrap();
    let (ctx, backend) = backend_context(&dir);
    let keymap = ctx.get::<SqlKeyMap>(KEYMAP).unwrap();
    let key = keymap.encode("Country", &"lt".into(), None).unwrap().unwrap();
    Connection::open(dir.path().join("keymap.db"))
        .unwrap()
        .execute(
            "INSERT INTO \"Country\" (key, value, redirect, modified_at)
             VALUES ('old', '\"lt\"', NULL, '2024-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
    run(&ctx, ScriptType::Upgrade, &["redirect"]);

    let execute = |sql: &str| {
        let mut tx = backend.begin().unwrap();
        tx.execute(sql, &[]).unwrap();
        tx.commit().unwrap();
    };
    execute(
        "CREATE TRIGGER blocked BEFORE INSERT ON \"Country/:redirect\"
         BEGIN SELECT RAISE(ABORT, 'blocked'); END",
    );

    let failed = run(&ctx, ScriptType::Upgrade, &["redirect", "deduplicate"]);
    assert_eq!(failed[1], ("deduplicate".to_string(), ScriptStatus::Required, true));
    assert_eq!(keymap.duplicate_keys("Country").unwrap().len(), 1);
    assert_eq!(keymap.decode_redirect("Country", &key).unwrap(), key);

    execute("DROP TRIGGER blocked");
    let retried = run(&ctx, ScriptType::Upgrade, &["redirect", "deduplicate"]);
    assert_eq!(retried[1], ("deduplicate".to_string(), ScriptStatus::Required, false));
    assert!(keymap.duplicate_keys("Country").unwrap().is_empty());

    let mut tx = backend.begin().unwrap();
    let rows = tx
        .query("SELECT \"_id\", \"redirect\" FROM \"Country/:redirect\"", &[])
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["_id"], json!(key));
}

#[test]
fn test_changelog_waits_for_redirect_tables() {
    let dir = TempDir::new().unwrap();
    let (ctx, _backend) = backend_context(&dir);
    // `deduplicate` is blocked while `redirect` is still required
    let reports = run(&ctx, ScriptType::Admin, &["changelog"]);
    assert_eq!(reports, vec![("changelog".to_string(), ScriptStatus::Skipped, false)]);
}

#[test]
fn test_keymap_migrations() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keymap.db");
    {
        let conn = Connection::open(&path).unwrap();
        schema::create_legacy_key_table(&conn, "Country").unwrap();
        conn.execute(
            "INSERT INTO \"Country\" (key, hash, value) VALUES ('k1', 'h', '\"lt\"')",
            [],
        )
        .unwrap();
    }
    let dsn = format!("sqlite:///{}", path.display());
    let keymap = SqlKeyMap::open(&KeymapConfig { dsn, ..KeymapConfig::default() }, true).unwrap();
    assert!(keymap.legacy());
    let ctx = context(&dir);
    ctx.attach_value(KEYMAP, keymap);

    let reports = run(
        &ctx,
        ScriptType::Upgrade,
        &["sql_keymap_redirect", "sql_keymap_initial"],
    );
    assert_eq!(
        reports,
        vec![
            ("sql_keymap_initial".to_string(), ScriptStatus::Required, false),
            ("sql_keymap_redirect".to_string(), ScriptStatus::Required, false),
        ]
    );

    let keymap = ctx.get::<SqlKeyMap>(KEYMAP).unwrap();
    assert!(keymap.missing_migrations().unwrap().is_empty());
    assert!(!keymap.legacy());
    assert_eq!(keymap.decode("Country", "k1").unwrap(), json!("lt"));
}

#[test]
fn test_model_limit_written_under_config_path() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let manifest = load_manifest_str(MANIFEST_CSV).unwrap();
    let limits = model_limits(&manifest, ctx.config().default_limit_bytes);
    // two strings, then a string and a ref
    assert_eq!(limits["Country"], 1024 * 1024 / 128);
    assert_eq!(limits["City"], 1024 * 1024 / 80);
    ctx.attach_value(MANIFEST, manifest);

    let first = run(&ctx, ScriptType::Admin, &["model_limit"]);
    assert_eq!(first, vec![("model_limit".to_string(), ScriptStatus::Required, false)]);
    let written: BTreeMap<String, u64> =
        serde_yaml::from_str(&fs::read_to_string(dir.path().join("limits.yml")).unwrap()).unwrap();
    assert_eq!(written, limits);

    let second = run(&ctx, ScriptType::Admin, &["model_limit"]);
    assert_eq!(second, vec![("model_limit".to_string(), ScriptStatus::Passed, false)]);
}
