//! Natural key values and their canonical JSON form
//!
//! Values are canonicalized before they are compared or stored: tuples
//! become lists, temporal values ISO-8601 strings and UUIDs strings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Number, Value};
use uuid::Uuid;

/// A natural key as handed to the keymap
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    /// Composite key
    Tuple(Vec<KeyValue>),
    /// Already JSON, e.g. a value read back from a feed
    Json(Value),
}

impl KeyValue {
    /// `fix_data_for_json`
    pub fn canonical(&self) -> Value {
        match self {
            KeyValue::Null => Value::Null,
            KeyValue::Bool(v) => Value::Bool(*v),
            KeyValue::Int(v) => Value::Number((*v).into()),
            KeyValue::Float(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            KeyValue::Str(v) => Value::String(v.clone()),
            KeyValue::Date(v) => Value::String(v.format("%Y-%m-%d").to_string()),
            KeyValue::Time(v) => Value::String(v.format("%H:%M:%S%.f").to_string()),
            KeyValue::DateTime(v) => Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            KeyValue::Timestamp(v) => Value::String(v.to_rfc3339()),
            KeyValue::Uuid(v) => Value::String(v.to_string()),
            KeyValue::Tuple(items) => Value::Array(items.iter().map(KeyValue::canonical).collect()),
            KeyValue::Json(v) => v.clone(),
        }
    }
}

/// A key is storable unless it is null or a sequence of nulls only
pub fn is_valid(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => items.iter().any(|item| !item.is_null()),
        _ => true,
    }
}

/// Text stored in the `value` column
pub fn encode_value(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Str(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Str(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<f64> for KeyValue {
    fn from(value: f64) -> Self {
        KeyValue::Float(value)
    }
}

impl From<bool> for KeyValue {
    fn from(value: bool) -> Self {
        KeyValue::Bool(value)
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        KeyValue::Uuid(value)
    }
}

impl From<NaiveDate> for KeyValue {
    fn from(value: NaiveDate) -> Self {
        KeyValue::Date(value)
    }
}

impl From<NaiveDateTime> for KeyValue {
    fn from(value: NaiveDateTime) -> Self {
        KeyValue::DateTime(value)
    }
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        KeyValue::Json(value)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeyValue::Null)
    }
}

impl From<Vec<KeyValue>> for KeyValue {
    fn from(items: Vec<KeyValue>) -> Self {
        KeyValue::Tuple(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_forms() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let key = KeyValue::Tuple(vec![date.into(), KeyValue::Int(7), "x".into()]);
        assert_eq!(key.canonical(), json!(["2024-02-29", 7, "x"]));

        let id = Uuid::nil();
        assert_eq!(KeyValue::from(id).canonical(), json!("00000000-0000-0000-0000-000000000000"));

        let datetime = date.and_hms_opt(12, 30, 0).unwrap();
        assert_eq!(KeyValue::from(datetime).canonical(), json!("2024-02-29T12:30:00"));
    }

    #[test]
    fn test_validity() {
        assert!(!is_valid(&KeyValue::Null.canonical()));
        assert!(!is_valid(&json!([null, null])));
        assert!(is_valid(&json!([null, 1])));
        assert!(is_valid(&json!("")));
        assert!(is_valid(&KeyValue::from(Some(3_i64)).canonical()));
        assert!(!is_valid(&KeyValue::from(None::<i64>).canonical()));
    }
}
