//! Commands driven through the parsed command line

use std::fs;
use std::path::Path;

use clap::Parser;
use rusqlite::Connection;
use spinta_cli::{diagnostics, run, Cli};
use spinta_core::ErrorCode;
use spinta_manifest::{load_manifest_str, Column};
use tempfile::TempDir;

const EXAMPLE: &str = "\
id,dataset,resource,base,model,property,type,ref,source,prepare,level,access,uri,title,description
,datasets/gov/example,,,,,,,,,,,,Example,
,,data,,,,sql,,sqlite://,,,,,,
,,,,Country,,,code,salis,,,,,,
,,,,,code,string,,kodas,,3,open,,,
,,,,,name,string,,pavadinimas,,3,open,,,
,,,,City,,,,miestas,,,,,,
,,,,,name,string,,pavadinimas,,3,open,,,
,,,,,country,ref,Country,salis,,4,open,,,
,,,,,population,integer,,gyventojai,,,protected,,,
";

/// Helper: run a command line and capture stdout
fn spinta(args: &[&str]) -> anyhow::Result<(i32, String)> {
    let cli = Cli::try_parse_from(std::iter::once("spinta").chain(args.iter().copied()))?;
    let mut out = Vec::new();
    let code = run(cli, &mut out)?;
    Ok((code, String::from_utf8(out)?))
}

fn write(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.display().to_string()
}

fn config(dir: &TempDir, extra: &str) -> String {
    let content = format!("config_path = {:?}\n{}", dir.path().display().to_string(), extra);
    write(dir, "config.toml", &content)
}

#[test]
fn test_init_writes_header_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("manifest.csv").display().to_string();
    assert_eq!(spinta(&["init", &path]).unwrap().0, 0);
    let header = fs::read_to_string(&path).unwrap();
    assert!(header.starts_with("id,dataset,resource,base,model,property,type,ref"));
    assert!(load_manifest_str(&header).unwrap().is_empty());

    assert!(spinta(&["init", &path]).is_err());
}

#[test]
fn test_copy_without_external_and_open_access() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "example.csv", EXAMPLE);
    let output = dir.path().join("copy.csv").display().to_string();

    let (code, _) = spinta(&["copy", "--no-external", "--access", "open", "-o", &output, &input]).unwrap();
    assert_eq!(code, 0);

    let csv = fs::read_to_string(&output).unwrap();
    let header = csv.lines().next().unwrap();
    assert!(!header.contains("source"));
    assert!(!header.contains("prepare"));
    assert!(!csv.contains("population"));

    let copy = load_manifest_str(&csv).unwrap();
    assert!(copy.has_model("datasets/gov/example/Country"));
    assert!(copy.has_model("datasets/gov/example/City"));
}

#[test]
fn test_copy_selected_columns_to_stdout() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "example.csv", EXAMPLE);
    let (_, out) = spinta(&["copy", "-c", "dataset,model,property,type", &input]).unwrap();
    let header = out.lines().next().unwrap();
    let expected: Vec<&str> = [Column::Dataset, Column::Model, Column::Property, Column::Type]
        .iter()
        .map(|c| c.name())
        .collect();
    assert_eq!(header, expected.join(","));
    assert!(out.contains("population"));
}

#[test]
fn test_check_and_show() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "example.csv", EXAMPLE);
    assert_eq!(spinta(&["check", &input]).unwrap(), (0, "OK\n".to_string()));

    let (_, table) = spinta(&["show", &input]).unwrap();
    assert!(table.contains("datasets/gov/example"));
    assert!(table.contains("Country"));
}

#[test]
fn test_check_reports_invalid_enum() {
    let dir = TempDir::new().unwrap();
    let input = write(
        &dir,
        "enum.csv",
        "model,property,type,ref,source,prepare,level\n\
         Side,,,,,,\n\
         ,side,string,,,,\n\
         ,,enum,side,l,'left',3\n",
    );
    let err = spinta(&["check", &input]).unwrap_err();
    assert_eq!(diagnostics::error_code(&err), Some(ErrorCode::InvalidValue));
    assert_eq!(diagnostics::exit_code(&err), 1);
}

fn people_db(dir: &TempDir) -> String {
    let path = dir.path().join("people.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE country_list (code TEXT PRIMARY KEY, name TEXT);
         CREATE TABLE person (
             id INTEGER PRIMARY KEY,
             email TEXT,
             country TEXT REFERENCES country_list(code)
         );
         INSERT INTO country_list VALUES ('lt', 'Lietuva');
         INSERT INTO person VALUES (1, 'jonas@example.lt', 'lt'), (2, 'ona@example.lt', 'lt');",
    )
    .unwrap();
    path.display().to_string()
}

#[test]
fn test_inspect_then_pii_detect() {
    let dir = TempDir::new().unwrap();
    let db = people_db(&dir);
    let manifest = dir.path().join("inspected.csv").display().to_string();

    spinta(&["inspect", "--dsn", &db, "--dataset", "datasets/gov/people", "-o", &manifest]).unwrap();
    let inspected = load_manifest_str(&fs::read_to_string(&manifest).unwrap()).unwrap();
    assert!(inspected.has_model("datasets/gov/people/CountryList"));
    assert!(inspected.has_model("datasets/gov/people/Person"));

    let (_, tagged) = spinta(&["pii", "detect", &manifest, "--dsn", &db]).unwrap();
    assert!(tagged.contains("pii:email"));
    assert!(tagged.contains("https://data.gov.lt/pii/"));
}

#[test]
fn test_getall_prints_json_lines() {
    let dir = TempDir::new().unwrap();
    let db = people_db(&dir);
    let manifest = dir.path().join("inspected.csv").display().to_string();
    spinta(&["inspect", "--dsn", &db, "--dataset", "datasets/gov/people", "-o", &manifest]).unwrap();
    let cfg = config(&dir, "");

    let (code, out) = spinta(&[
        "--config",
        &cfg,
        "getall",
        &manifest,
        &db,
        "datasets/gov/people/Person",
        "--sort",
        "-id",
    ])
    .unwrap();
    assert_eq!(code, 0);
    let rows: Vec<serde_json::Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["email"], "ona@example.lt");
    assert_eq!(rows[0]["_type"], "datasets/gov/people/Person");
    assert!(rows[0]["country"]["_id"].is_string());
}

#[test]
fn test_upgrade_clients_then_passed() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("clients")).unwrap();
    write(
        &dir,
        "clients/TEST.yml",
        "client_id: TEST\nclient_secret_hash: s\nscopes:\n  - x\n",
    );
    let cfg = config(&dir, "");

    let (code, out) = spinta(&["--config", &cfg, "upgrade", "clients"]).unwrap();
    assert_eq!((code, out.as_str()), (0, "clients: REQUIRED\n"));
    assert!(dir.path().join("clients/helpers/keymap.yml").is_file());

    let (_, again) = spinta(&["--config", &cfg, "upgrade", "clients"]).unwrap();
    assert_eq!(again, "clients: PASSED\n");
}

#[test]
fn test_upgrade_redirect_through_config() {
    let dir = TempDir::new().unwrap();
    let manifest = write(
        &dir,
        "manifest.csv",
        "model,property,type,ref\nCountry,,,code\n,code,string,\nCity,,,\n,name,string,\n",
    );
    let db = dir.path().join("data.db");
    let cfg = config(
        &dir,
        &format!(
            "manifest = {:?}\n\n[backends.default]\ntype = \"sql\"\ndsn = {:?}\n",
            manifest,
            format!("sqlite:///{}", db.display())
        ),
    );

    let (_, out) = spinta(&["--config", &cfg, "upgrade", "redirect"]).unwrap();
    assert_eq!(out, "redirect: REQUIRED\n");
    assert!(table_exists(&db, "Country/:redirect"));
    assert!(table_exists(&db, "City/:redirect"));

    let (_, again) = spinta(&["--config", &cfg, "upgrade", "redirect", "--check"]).unwrap();
    assert_eq!(again, "redirect: PASSED\n");
}

#[test]
fn test_failed_script_sets_exit_code() {
    let dir = TempDir::new().unwrap();
    // no backends configured, so the default one is missing
    let manifest = write(&dir, "manifest.csv", "model,property,type\nCountry,,\n,name,string\n");
    let cfg = config(&dir, &format!("manifest = {:?}\n", manifest));

    let (code, out) = spinta(&["--config", &cfg, "upgrade", "redirect"]).unwrap();
    assert_eq!(code, spinta_cli::EXIT_SCRIPT_FAILED);
    assert!(out.starts_with("redirect: REQUIRED ("));
}

fn table_exists(db: &Path, table: &str) -> bool {
    Connection::open(db)
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
        == 1
}
