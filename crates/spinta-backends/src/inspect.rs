//! Manifest drafts from a live database
//!
//! Every table becomes a model named in `UpperCamelCase` with its columns
//! as properties. Primary keys come from the table's primary key or, when
//! it has none, its first unique index. Foreign keys become `ref`
//! properties named after their first column.

use std::collections::BTreeMap;

use spinta_manifest::names::{model_name, property_name};
use spinta_manifest::{Column, DataType, TabularRow};
use tracing::{debug, info};

use crate::backend::{Backend, ForeignKey, SqlDdl};
use crate::error::BackendError;
use crate::table::{TableName, TableType};

#[derive(Debug, Clone)]
pub struct InspectOptions {
    pub dataset: String,
    pub resource: String,
    /// DSN written to the resource `source`
    pub dsn: String,
    /// Fail on tables without a primary key or unique index
    pub require_pk: bool,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            dataset: "dataset".to_string(),
            resource: "resource1".to_string(),
            dsn: String::new(),
            require_pk: false,
        }
    }
}

/// Dtype for a declared SQL column type, by SQLite affinity rules
pub fn sql_dtype(sql_type: &str) -> DataType {
    let upper = sql_type.to_uppercase();
    if upper.contains("BOOL") {
        DataType::Boolean
    } else if upper.contains("DATETIME") || upper.contains("TIMESTAMP") {
        DataType::Datetime
    } else if upper.contains("DATE") {
        DataType::Date
    } else if upper.contains("TIME") {
        DataType::Time
    } else if upper.contains("INT") {
        DataType::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        DataType::String
    } else if upper.contains("BLOB") {
        DataType::Binary
    } else if upper.contains("REAL")
        || upper.contains("FLOA")
        || upper.contains("DOUB")
        || upper.contains("NUMERIC")
        || upper.contains("DECIMAL")
    {
        DataType::Number
    } else {
        DataType::String
    }
}

struct Reflected {
    table: String,
    model: String,
    columns: Vec<(String, DataType)>,
    pkeys: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
}

/// Reflect every user table of `backend` into tabular manifest rows
pub fn inspect(backend: &dyn Backend, options: &InspectOptions) -> Result<Vec<TabularRow>, BackendError> {
    let ddl = backend
        .ddl()
        .ok_or_else(|| BackendError::UnknownBackendType(backend.kind().to_string()))?;

    let mut reflected = Vec::new();
    for table in ddl.list_tables(None)? {
        if table.starts_with('_') || TableType::split(&table).1 != TableType::Data {
            debug!(table = %table, "skipping internal table");
            continue;
        }
        reflected.push(reflect(backend, ddl, &table, options.require_pk)?);
    }

    // Target primary keys, to decide whether a foreign key needs `[refprops]`
    let pkeys: BTreeMap<&str, (&str, &[String])> = reflected
        .iter()
        .map(|r| (r.table.as_str(), (r.model.as_str(), r.pkeys.as_slice())))
        .collect();

    let mut rows = vec![
        TabularRow::new().with(Column::Dataset, &options.dataset),
        TabularRow::new()
            .with(Column::Resource, &options.resource)
            .with(Column::Type, "sql")
            .with(Column::Ref, backend.name())
            .with(Column::Source, &options.dsn),
    ];

    for table in &reflected {
        rows.push(
            TabularRow::new()
                .with(Column::Model, &table.model)
                .with(Column::Ref, table.pkeys.iter().map(|c| property_name(c)).collect::<Vec<_>>().join(", "))
                .with(Column::Source, &table.table),
        );

        let mut refs: BTreeMap<&str, &ForeignKey> = BTreeMap::new();
        for key in &table.foreign_keys {
            if let Some(first) = key.columns.first() {
                refs.entry(first.as_str()).or_insert(key);
            }
        }

        for (column, dtype) in &table.columns {
            let row = TabularRow::new()
                .with(Column::Property, property_name(column))
                .with(Column::Source, column);
            let row = match refs.get(column.as_str()) {
                Some(key) => {
                    let target = pkeys
                        .get(key.ref_table.as_str())
                        .map(|(model, _)| model.to_string())
                        .unwrap_or_else(|| model_name(&key.ref_table));
                    let target_pk = pkeys
                        .get(key.ref_table.as_str())
                        .map(|(_, pk)| pk.to_vec())
                        .unwrap_or_default();
                    let refprops = if key.ref_columns.is_empty() || key.ref_columns == target_pk {
                        target
                    } else {
                        let props: Vec<String> = key.ref_columns.iter().map(|c| property_name(c)).collect();
                        format!("{}[{}]", target, props.join(", "))
                    };
                    row.with(Column::Type, DataType::Ref.as_str()).with(Column::Ref, refprops)
                }
                None => row.with(Column::Type, dtype.as_str()),
            };
            rows.push(row);
        }
    }

    info!(backend = backend.name(), models = reflected.len(), "inspected backend");
    Ok(rows)
}

fn reflect(
    backend: &dyn Backend,
    ddl: &dyn SqlDdl,
    table: &str,
    require_pk: bool,
) -> Result<Reflected, BackendError> {
    let name = TableName::new(table);
    let handle = backend.get_table(&name)?;

    let mut pkeys: Vec<String> = handle.primary_key().into_iter().map(str::to_string).collect();
    if pkeys.is_empty() {
        if let Some(unique) = ddl.unique_indexes(&name)?.into_iter().next() {
            pkeys = unique;
        }
    }
    if pkeys.is_empty() && require_pk {
        return Err(BackendError::NoPrimaryKeyCandidates {
            table: table.to_string(),
        });
    }

    Ok(Reflected {
        table: table.to_string(),
        model: model_name(table),
        columns: handle
            .columns
            .iter()
            .map(|c| (c.name.clone(), sql_dtype(&c.sql_type)))
            .collect(),
        pkeys,
        foreign_keys: ddl.foreign_keys(&name)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;

    fn rows_of(rows: &[TabularRow], column: Column) -> Vec<&str> {
        rows.iter().map(|r| r.get(column)).filter(|v| !v.is_empty()).collect()
    }

    #[test]
    fn test_sql_dtype() {
        assert_eq!(sql_dtype("INTEGER"), DataType::Integer);
        assert_eq!(sql_dtype("varchar(20)"), DataType::String);
        assert_eq!(sql_dtype("DOUBLE PRECISION"), DataType::Number);
        assert_eq!(sql_dtype("TIMESTAMP"), DataType::Datetime);
        assert_eq!(sql_dtype("DATE"), DataType::Date);
        assert_eq!(sql_dtype("BLOB"), DataType::Binary);
        assert_eq!(sql_dtype(""), DataType::String);
    }

    #[test]
    fn test_inspect_models_and_refs() {
        let backend = SqliteBackend::open_in_memory("default").unwrap();
        backend
            .execute_batch(
                "CREATE TABLE country_list (code TEXT PRIMARY KEY, title TEXT);
                 CREATE TABLE city (id INTEGER PRIMARY KEY, name TEXT,
                                    countryCode TEXT REFERENCES country_list(code));
                 CREATE TABLE tags (label TEXT NOT NULL UNIQUE);",
            )
            .unwrap();
        let options = InspectOptions {
            dataset: "datasets/gov/demo".into(),
            dsn: "sqlite://".into(),
            ..InspectOptions::default()
        };
        let rows = inspect(&backend, &options).unwrap();

        assert_eq!(rows_of(&rows, Column::Dataset), vec!["datasets/gov/demo"]);
        assert_eq!(rows_of(&rows, Column::Model), vec!["City", "CountryList", "Tags"]);
        let city = rows.iter().find(|r| r.get(Column::Model) == "City").unwrap();
        assert_eq!(city.get(Column::Ref), "id");
        let tags = rows.iter().find(|r| r.get(Column::Model) == "Tags").unwrap();
        assert_eq!(tags.get(Column::Ref), "label");

        let country = rows
            .iter()
            .find(|r| r.get(Column::Property) == "country_code")
            .unwrap();
        assert_eq!(country.get(Column::Type), "ref");
        assert_eq!(country.get(Column::Ref), "CountryList");
        assert_eq!(country.get(Column::Source), "countryCode");
    }

    #[test]
    fn test_require_pk() {
        let backend = SqliteBackend::open_in_memory("default").unwrap();
        backend.execute_batch("CREATE TABLE logs (line TEXT);").unwrap();

        let rows = inspect(&backend, &InspectOptions::default()).unwrap();
        let logs = rows.iter().find(|r| r.get(Column::Model) == "Logs").unwrap();
        assert_eq!(logs.get(Column::Ref), "");

        let options = InspectOptions {
            require_pk: true,
            ..InspectOptions::default()
        };
        let err = inspect(&backend, &options).unwrap_err();
        assert!(matches!(err, BackendError::NoPrimaryKeyCandidates { table } if table == "logs"));
    }
}
