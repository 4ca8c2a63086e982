//! Reading model data through the manifest
//!
//! External models read the table named by their `source` and map columns
//! back to property names; `_id` comes from the keymap, keyed by the
//! model's primary key values. Internal models carry `_id` in the table.

use serde_json::{Map, Value};
use spinta_keymap::{KeyMap, KeyValue};
use spinta_manifest::{DataType, Manifest, ModelId, PropertyId};
use spinta_spyna::Expr;
use tracing::debug;

use crate::backend::Backend;
use crate::dialect::Direction;
use crate::error::BackendError;
use crate::query::QueryPlan;
use crate::table::TableName;

#[derive(Debug, Clone, Default)]
pub struct GetAllOptions {
    pub filter: Option<Expr>,
    pub sort: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

struct Selected {
    property: PropertyId,
    alias: String,
    dtype: DataType,
}

/// Query plan selecting every readable property of `model`
pub fn model_plan(
    manifest: &Manifest,
    model: ModelId,
    options: &GetAllOptions,
) -> Result<QueryPlan, BackendError> {
    Ok(plan_with_columns(manifest, model, options)?.0)
}

fn plan_with_columns(
    manifest: &Manifest,
    model: ModelId,
    options: &GetAllOptions,
) -> Result<(QueryPlan, Vec<Selected>, bool), BackendError> {
    let node = manifest.model(model);
    let internal = node.external.is_empty();
    let table = if internal { &node.name } else { &node.external };

    let mut plan = QueryPlan::new(TableName::new(table.clone()));
    if internal {
        plan = plan.column("_id", "_id");
    }
    let mut selected = Vec::new();
    for &pid in &node.properties {
        let property = manifest.property(pid);
        if property.synthetic || property.dtype.kind == DataType::Backref {
            continue;
        }
        let column = if internal {
            property.name.clone()
        } else if property.external.is_empty() {
            continue;
        } else {
            property.external.clone()
        };
        plan = plan.column(column, property.name.clone());
        selected.push(Selected {
            property: pid,
            alias: property.name.clone(),
            dtype: property.dtype.kind,
        });
    }

    plan.filter = options.filter.clone();
    plan.sort = options.sort.clone();
    plan.limit = options.limit;
    plan.offset = options.offset;
    Ok((plan, selected, internal))
}

/// Every row of `model` as a JSON object with `_type` and `_id`
pub fn getall(
    backend: &dyn Backend,
    manifest: &Manifest,
    model: ModelId,
    keymap: &dyn KeyMap,
    options: &GetAllOptions,
) -> Result<Vec<Value>, BackendError> {
    let (plan, selected, internal) = plan_with_columns(manifest, model, options)?;
    let dialect = backend.dialect();
    let query = plan.compile(dialect.as_ref())?;
    debug!(model = %manifest.model(model).name, sql = %query.sql, "getall");

    let rows = {
        let mut tx = backend.begin()?;
        let rows = tx.query(&query.sql, &query.params)?;
        tx.commit()?;
        rows
    };

    let node = manifest.model(model);
    let mut result = Vec::with_capacity(rows.len());
    for mut row in rows {
        let mut object = Map::new();
        object.insert("_type".into(), Value::String(node.name.clone()));

        let mut values = Map::new();
        for column in &selected {
            let raw = row.remove(&column.alias).unwrap_or(Value::Null);
            let value = dialect.read_value(raw, Some(column.dtype));
            values.insert(column.alias.clone(), value);
        }

        let id = if internal {
            row.remove("_id").unwrap_or(Value::Null)
        } else {
            let key = natural_key(manifest, model, &values);
            keymap
                .encode(&node.name, &key, None)?
                .map(Value::String)
                .unwrap_or(Value::Null)
        };
        object.insert("_id".into(), id);

        for column in &selected {
            let value = values.remove(&column.alias).unwrap_or(Value::Null);
            let property = manifest.property(column.property);
            let value = match (property.dtype.kind, property.ref_model) {
                (DataType::Ref, Some(target)) if !internal && !value.is_null() => {
                    let target_name = &manifest.model(target).name;
                    let key = keymap.encode(target_name, &KeyValue::Json(value), None)?;
                    let mut reference = Map::new();
                    reference.insert("_id".into(), key.map(Value::String).unwrap_or(Value::Null));
                    Value::Object(reference)
                }
                _ => value,
            };
            object.insert(column.alias.clone(), value);
        }
        result.push(Value::Object(object));
    }
    Ok(result)
}

/// Primary key values of a row; every value when the model has none
fn natural_key(manifest: &Manifest, model: ModelId, values: &Map<String, Value>) -> KeyValue {
    let node = manifest.model(model);
    let names: Vec<&str> = if node.pkey_ids.is_empty() {
        values.keys().map(String::as_str).collect()
    } else {
        node.pkey_ids
            .iter()
            .map(|pid| manifest.property(*pid).name.as_str())
            .collect()
    };
    let mut parts: Vec<KeyValue> = names
        .iter()
        .map(|name| KeyValue::Json(values.get(*name).cloned().unwrap_or(Value::Null)))
        .collect();
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        KeyValue::Tuple(parts)
    }
}
