//! Keymap behaviour across encode, synchronize, validation and migrations

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde_json::json;
use spinta_core::{ErrorCode, KeymapConfig, Reportable};
use spinta_keymap::{schema, KeyMap, KeyValue, KeymapError, KeymapSyncData, SqlKeyMap};
use tempfile::TempDir;

/// Helper: keymap stored in a file so a second connection can reach it
fn open_keymap(dir: &TempDir, config: KeymapConfig) -> SqlKeyMap {
    let dsn = format!("sqlite:///{}", dir.path().join("keymap.db").display());
    SqlKeyMap::open(&KeymapConfig { dsn, ..config }, false).expect("keymap opens")
}

fn raw_connection(dir: &TempDir) -> Connection {
    Connection::open(dir.path().join("keymap.db")).unwrap()
}

fn redirect(name: &str, from: &str, to: &str) -> KeymapSyncData {
    KeymapSyncData {
        name: name.into(),
        identifier: from.into(),
        redirect: Some(to.into()),
        ..Default::default()
    }
}

// === Laws ===

#[test]
fn test_decode_returns_canonical_value() {
    let keymap = SqlKeyMap::open_in_memory().unwrap();
    let date = chrono::NaiveDate::from_ymd_opt(2023, 5, 1).unwrap();
    let value = KeyValue::Tuple(vec![date.into(), "LT".into()]);
    let key = keymap.encode("datasets/gov/example/City", &value, None).unwrap().unwrap();
    assert_eq!(
        keymap.decode("datasets/gov/example/City", &key).unwrap(),
        json!(["2023-05-01", "LT"])
    );
}

#[test]
fn test_encode_is_idempotent() {
    let keymap = SqlKeyMap::open_in_memory().unwrap();
    let first = keymap.encode("X", &"a".into(), None).unwrap();
    let second = keymap.encode("X", &"a".into(), None).unwrap();
    assert!(first.is_some());
    assert_eq!(first, second);
    assert_ne!(first, keymap.encode("X", &"b".into(), None).unwrap());
    assert!(uuid::Uuid::parse_str(first.as_deref().unwrap()).is_ok());
}

#[test]
fn test_redirect_keeps_encode_and_moves_lookups() {
    let keymap = SqlKeyMap::open_in_memory().unwrap();
    let old = keymap.encode("X", &"a".into(), None).unwrap().unwrap();
    let new = keymap.encode("X", &"b".into(), None).unwrap().unwrap();

    let stats = keymap
        .synchronize(&mut vec![redirect("X", &old, &new)].into_iter())
        .unwrap();
    assert_eq!(stats.redirected, 1);

    assert_eq!(keymap.encode("X", &"a".into(), None).unwrap().as_deref(), Some(old.as_str()));
    assert_eq!(keymap.decode_redirect("X", &old).unwrap(), new);
    assert_eq!(keymap.decode_redirect("X", &new).unwrap(), new);
    assert!(keymap.has_key("X", &old).unwrap());
}

#[test]
fn test_validate_data_after_encode_only() {
    let keymap = SqlKeyMap::open_in_memory().unwrap();
    for value in ["a", "b", "a", "c", "b"] {
        keymap.encode("X", &value.into(), None).unwrap();
    }
    keymap.validate_data("X").unwrap();
}

#[test]
fn test_given_key_is_never_rebound() {
    let keymap = SqlKeyMap::open_in_memory().unwrap();
    let key = keymap.encode("X", &"a".into(), Some("k1")).unwrap();
    assert_eq!(key.as_deref(), Some("k1"));

    let err = keymap.encode("X", &"b".into(), Some("k1")).unwrap_err();
    assert!(matches!(err, KeymapError::KeyTaken { ref key, .. } if key == "k1"));
    assert_eq!(err.code(), ErrorCode::KeyMapGivenKeyMissmatch);

    assert_eq!(keymap.decode("X", "k1").unwrap(), json!("a"));
    assert_eq!(keymap.encode("X", &"a".into(), None).unwrap(), key);
    assert!(!keymap.contains("X", &"b".into()).unwrap());
}

// === Duplicate detection ===

#[test]
fn test_duplicate_mapping_detected() {
    let dir = TempDir::new().unwrap();
    let keymap = open_keymap(&dir, KeymapConfig::default());
    let key = keymap.encode("X", &"a".into(), None).unwrap();
    assert_eq!(keymap.encode("X", &"a".into(), None).unwrap(), key);

    raw_connection(&dir)
        .execute(
            "INSERT INTO \"X\" (key, value, redirect, modified_at)
             VALUES ('new', '\"a\"', NULL, '2024-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

    let err = keymap.validate_data("X").unwrap_err();
    assert!(matches!(
        err,
        KeymapError::DuplicateMapping {
            key_count: 1,
            affected_count: 2,
            ..
        }
    ));
    assert_eq!(err.code(), ErrorCode::KeymapDuplicateMapping);
    assert_eq!(err.context()["affected_count"], json!(2));
}

#[test]
fn test_duplicates_resolved_by_redirect() {
    let dir = TempDir::new().unwrap();
    let keymap = open_keymap(&dir, KeymapConfig::default());
    let key = keymap.encode("X", &"a".into(), None).unwrap().unwrap();
    raw_connection(&dir)
        .execute(
            "INSERT INTO \"X\" (key, value, redirect, modified_at)
             VALUES ('old', '\"a\"', NULL, '2024-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

    let groups = keymap.duplicate_keys("X").unwrap();
    assert_eq!(groups, vec![vec!["old".to_string(), key.clone()]]);

    assert!(keymap.redirect_key("X", &key, "old").unwrap());
    assert!(keymap.duplicate_keys("X").unwrap().is_empty());
    keymap.validate_data("X").unwrap();
    assert_eq!(keymap.decode_redirect("X", &key).unwrap(), "old");
}

#[test]
fn test_duplicate_mapping_warn_only() {
    let dir = TempDir::new().unwrap();
    let keymap = open_keymap(
        &dir,
        KeymapConfig {
            duplicate_warn_only: true,
            ..KeymapConfig::default()
        },
    );
    keymap.encode("X", &"a".into(), None).unwrap();
    raw_connection(&dir)
        .execute(
            "INSERT INTO \"X\" (key, value, redirect, modified_at)
             VALUES ('new', '\"a\"', NULL, '2024-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();
    keymap.validate_data("X").unwrap();
}

#[test]
fn test_redirected_duplicates_are_not_counted() {
    let keymap = SqlKeyMap::open_in_memory().unwrap();
    let events = vec![
        KeymapSyncData {
            name: "X".into(),
            identifier: "k1".into(),
            value: json!("a"),
            ..Default::default()
        },
        KeymapSyncData {
            name: "X".into(),
            identifier: "k2".into(),
            value: json!("a"),
            ..Default::default()
        },
    ];
    keymap.synchronize(&mut events.into_iter()).unwrap();
    assert!(keymap.validate_data("X").is_err());

    keymap
        .synchronize(&mut vec![redirect("X", "k2", "k1")].into_iter())
        .unwrap();
    keymap.validate_data("X").unwrap();
}

// === Synchronize ===

#[test]
fn test_synchronize_uses_created_timestamp() {
    let dir = TempDir::new().unwrap();
    let keymap = open_keymap(&dir, KeymapConfig::default());
    let mut data = serde_json::Map::new();
    data.insert("_created".into(), json!("2020-01-01T00:00:00.000000Z"));
    let events = vec![
        KeymapSyncData {
            name: "X".into(),
            identifier: "k1".into(),
            value: json!("a"),
            data,
            ..Default::default()
        },
        KeymapSyncData {
            name: "X".into(),
            identifier: "k2".into(),
            value: json!(null),
            ..Default::default()
        },
    ];
    let stats = keymap.synchronize(&mut events.into_iter()).unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.written, 1);
    assert_eq!(stats.skipped, 1);

    let modified: String = raw_connection(&dir)
        .query_row("SELECT modified_at FROM \"X\" WHERE key = 'k1'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(modified, "2020-01-01T00:00:00.000000Z");
    assert_eq!(keymap.decode("X", "k1").unwrap(), json!("a"));
}

#[test]
fn test_legacy_synchronize_ignores_redirects() {
    let keymap = SqlKeyMap::from_connection(
        Connection::open_in_memory().unwrap(),
        &KeymapConfig {
            legacy_sync: Some(true),
            ..KeymapConfig::default()
        },
        false,
    )
    .unwrap();
    assert!(keymap.legacy());

    let events = vec![
        KeymapSyncData {
            name: "X".into(),
            identifier: "k1".into(),
            value: json!("a"),
            ..Default::default()
        },
        redirect("X", "k1", "k2"),
    ];
    let stats = keymap.synchronize(&mut events.into_iter()).unwrap();
    assert_eq!(stats.written, 1);
    assert_eq!(stats.redirected, 0);
    assert_eq!(keymap.decode_redirect("X", "k1").unwrap(), "k1");
}

// === Concurrency ===

#[test]
fn test_encode_runs_between_synchronize_batches() {
    let dir = TempDir::new().unwrap();
    let keymap = Arc::new(open_keymap(
        &dir,
        KeymapConfig {
            sync_transaction_size: 1,
            ..KeymapConfig::default()
        },
    ));
    let (release, released) = mpsc::channel::<()>();

    let syncing = {
        let keymap = Arc::clone(&keymap);
        thread::spawn(move || {
            let first = KeymapSyncData {
                name: "sync/Model".into(),
                identifier: "k1".into(),
                value: json!("x"),
                ..Default::default()
            };
            // the stream stalls after its first event until released
            let mut events = std::iter::once(first).chain(std::iter::from_fn(move || {
                let _ = released.recv_timeout(Duration::from_secs(5));
                None
            }));
            keymap.synchronize(&mut events).unwrap()
        })
    };

    let started = Instant::now();
    while !keymap.has_key("sync/Model", "k1").unwrap() {
        assert!(started.elapsed() < Duration::from_secs(5), "first batch never committed");
        thread::sleep(Duration::from_millis(10));
    }

    let encoding = Instant::now();
    let key = keymap.encode("other/Model", &"y".into(), None).unwrap();
    let waited = encoding.elapsed();
    release.send(()).unwrap();

    assert!(key.is_some());
    assert!(waited < Duration::from_secs(1), "encode waited {:?}", waited);
    let stats = syncing.join().unwrap();
    assert_eq!((stats.processed, stats.batches), (1, 1));
}

#[test]
fn test_encode_from_threads_agrees_on_keys() {
    let keymap = Arc::new(SqlKeyMap::open_in_memory().unwrap());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let keymap = Arc::clone(&keymap);
            thread::spawn(move || {
                let model = format!("M{}", i % 2);
                (0..20)
                    .map(|n| keymap.encode(&model, &KeyValue::Int(n), None).unwrap().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let keys: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(keys[0], keys[2]);
    assert_eq!(keys[1], keys[3]);
    keymap.validate_data("M0").unwrap();
    keymap.validate_data("M1").unwrap();
}

// === Migrations ===

#[test]
fn test_missing_migrations_refuse_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("keymap.db");
    {
        let conn = Connection::open(&path).unwrap();
        schema::create_legacy_key_table(&conn, "X").unwrap();
    }
    let config = KeymapConfig {
        dsn: format!("sqlite:///{}", path.display()),
        ..KeymapConfig::default()
    };

    let err = SqlKeyMap::open(&config, false).err().unwrap();
    assert!(matches!(err, KeymapError::MigrationRequired { ref missing } if missing.len() == 2));
    assert_eq!(err.code(), ErrorCode::KeymapMigrationRequired);

    let keymap = SqlKeyMap::open(&config, true).unwrap();
    assert!(keymap.legacy());
    keymap.migrate_initial().unwrap();
    keymap.migrate_redirect(|_, _| {}).unwrap();
    assert!(!keymap.legacy());
    drop(keymap);

    let keymap = SqlKeyMap::open(&config, false).unwrap();
    assert!(keymap.encode("X", &"a".into(), None).unwrap().is_some());
}
