//! Expression tree and its JSON form

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::error::SpynaError;

/// Name of the leaf call that refers to an identifier
pub const BIND: &str = "bind";

/// A spyna expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Expr>),
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn bind(identifier: impl Into<String>) -> Self {
        Expr::Call {
            name: BIND.to_string(),
            args: vec![Expr::Str(identifier.into())],
        }
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Str(value.into())
    }

    /// Identifier of a `bind` node
    pub fn as_bind(&self) -> Option<&str> {
        match self {
            Expr::Call { name, args } if name == BIND => match args.as_slice() {
                [Expr::Str(identifier)] => Some(identifier.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<(&str, &[Expr])> {
        match self {
            Expr::Call { name, args } => Some((name.as_str(), args.as_slice())),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_)
        )
    }

    /// Every identifier bound anywhere in the tree, in visiting order
    pub fn binds(&self) -> Vec<&str> {
        let mut found = Vec::new();
        self.collect_binds(&mut found);
        found
    }

    fn collect_binds<'a>(&'a self, found: &mut Vec<&'a str>) {
        if let Some(identifier) = self.as_bind() {
            found.push(identifier);
            return;
        }
        match self {
            Expr::List(items) => items.iter().for_each(|item| item.collect_binds(found)),
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_binds(found)),
            _ => {}
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Expr::Null => Value::Null,
            Expr::Bool(value) => Value::Bool(*value),
            Expr::Int(value) => Value::Number((*value).into()),
            Expr::Float(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Expr::Str(value) => Value::String(value.clone()),
            Expr::List(items) => Value::Array(items.iter().map(Expr::to_json).collect()),
            Expr::Call { name, args } => {
                let mut object = Map::new();
                object.insert("name".into(), Value::String(name.clone()));
                object.insert(
                    "args".into(),
                    Value::Array(args.iter().map(Expr::to_json).collect()),
                );
                Value::Object(object)
            }
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, SpynaError> {
        Ok(match value {
            Value::Null => Expr::Null,
            Value::Bool(value) => Expr::Bool(*value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => Expr::Int(value),
                None => Expr::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(value) => Expr::Str(value.clone()),
            Value::Array(items) => Expr::List(
                items
                    .iter()
                    .map(Expr::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Object(object) => {
                let name = object
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SpynaError::InvalidNode(value.to_string()))?;
                let args = match object.get("args") {
                    Some(Value::Array(args)) => args
                        .iter()
                        .map(Expr::from_json)
                        .collect::<Result<Vec<_>, _>>()?,
                    None => Vec::new(),
                    Some(_) => return Err(SpynaError::InvalidNode(value.to_string())),
                };
                Expr::Call {
                    name: name.to_string(),
                    args,
                }
            }
        })
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Expr::from_json(&value).map_err(serde::de::Error::custom)
    }
}
