//! Query plans compiled through a dialect
//!
//! A plan names a table, the columns to select, an optional spyna filter
//! and sort keys. Identifiers in the filter are property names; `aliases`
//! maps them to columns.

use std::collections::BTreeMap;

use serde_json::Value;
use spinta_spyna::Expr;

use crate::dialect::{Dialect, Direction};
use crate::error::BackendError;
use crate::table::TableName;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: TableName,
    /// `(column, alias)` pairs in select order
    pub columns: Vec<(String, String)>,
    pub filter: Option<Expr>,
    pub sort: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryPlan {
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            columns: Vec::new(),
            filter: None,
            sort: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.columns.push((column.into(), alias.into()));
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>, direction: Direction) -> Self {
        self.sort.push((key.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn compile(&self, dialect: &dyn Dialect) -> Result<CompiledQuery, BackendError> {
        let aliases: BTreeMap<&str, &str> = self
            .columns
            .iter()
            .map(|(column, alias)| (alias.as_str(), column.as_str()))
            .collect();
        let mut compiler = Compiler {
            dialect,
            aliases: &aliases,
            params: Vec::new(),
        };

        let select = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|(column, alias)| {
                    let column = compiler.ident(column);
                    let alias = dialect.quote_ident(alias);
                    if column == alias {
                        column
                    } else {
                        format!("{} AS {}", column, alias)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", select, dialect.qualify(&self.table));
        if let Some(filter) = &self.filter {
            let condition = compiler.condition(filter)?;
            sql.push_str(" WHERE ");
            sql.push_str(&condition);
        }
        if !self.sort.is_empty() {
            let keys: Vec<String> = self
                .sort
                .iter()
                .map(|(key, direction)| dialect.order(&compiler.column(key), *direction))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        Ok(CompiledQuery {
            sql,
            params: compiler.params,
        })
    }
}

/// `-name,code` or `name:desc,code:asc`
pub fn parse_sort(spec: &str) -> Result<Vec<(String, Direction)>, BackendError> {
    let mut keys = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let key = match part.split_once(':') {
            Some((name, "asc")) => (name.to_string(), Direction::Asc),
            Some((name, "desc")) => (name.to_string(), Direction::Desc),
            Some((_, other)) => {
                return Err(BackendError::UnsupportedExpr(format!(
                    "invalid sort direction '{}'",
                    other
                )))
            }
            None => match part.strip_prefix('-') {
                Some(name) => (name.to_string(), Direction::Desc),
                None => (part.trim_start_matches('+').to_string(), Direction::Asc),
            },
        };
        keys.push(key);
    }
    Ok(keys)
}

struct Compiler<'a> {
    dialect: &'a dyn Dialect,
    aliases: &'a BTreeMap<&'a str, &'a str>,
    params: Vec<Value>,
}

impl Compiler<'_> {
    fn ident(&self, name: &str) -> String {
        self.dialect.quote_ident(&self.dialect.normalize_ident(name))
    }

    /// Column for a property name, falling back to the name itself
    fn column(&self, name: &str) -> String {
        let column = self.aliases.get(name).copied().unwrap_or(name);
        self.ident(column)
    }

    fn value(&mut self, value: Value) -> String {
        match self.dialect.placeholder(self.params.len() + 1) {
            Some(marker) => {
                self.params.push(value);
                marker
            }
            None => self.dialect.literal(&value),
        }
    }

    fn condition(&mut self, expr: &Expr) -> Result<String, BackendError> {
        let Some((name, args)) = expr.as_call() else {
            return Err(BackendError::UnsupportedExpr(format!("{:?}", expr)));
        };
        match (name, args) {
            ("and" | "or", args) if !args.is_empty() => {
                let joiner = if name == "and" { " AND " } else { " OR " };
                let parts = args
                    .iter()
                    .map(|arg| self.condition(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(joiner)))
            }
            ("not", [arg]) => Ok(format!("NOT ({})", self.condition(arg)?)),
            ("eq" | "ne", [left, Expr::Null]) | ("eq" | "ne", [Expr::Null, left]) => {
                let operand = self.operand(left)?;
                let test = if name == "eq" { "IS NULL" } else { "IS NOT NULL" };
                Ok(format!("{} {}", operand, test))
            }
            ("eq" | "ne" | "lt" | "le" | "gt" | "ge", [left, right]) => {
                let op = match name {
                    "eq" => "=",
                    "ne" => "<>",
                    "lt" => "<",
                    "le" => "<=",
                    "gt" => ">",
                    _ => ">=",
                };
                let left = self.operand(left)?;
                let right = self.operand(right)?;
                Ok(format!("{} {} {}", left, op, right))
            }
            ("contains" | "startswith", [left, Expr::Str(text)]) => {
                let pattern = if name == "contains" {
                    format!("%{}%", text)
                } else {
                    format!("{}%", text)
                };
                let left = self.operand(left)?;
                let right = self.value(Value::String(pattern));
                Ok(format!("{} LIKE {}", left, right))
            }
            _ => Err(BackendError::UnsupportedExpr(spinta_spyna::unparse(expr))),
        }
    }

    fn operand(&mut self, expr: &Expr) -> Result<String, BackendError> {
        if let Some(name) = expr.as_bind() {
            return Ok(self.column(name));
        }
        if expr.is_literal() {
            return Ok(self.value(expr.to_json()));
        }
        Err(BackendError::UnsupportedExpr(spinta_spyna::unparse(expr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{SasDialect, SqliteDialect};
    use serde_json::json;
    use spinta_spyna::parse;

    fn plan() -> QueryPlan {
        QueryPlan::new(TableName::new("cities"))
            .column("pavadinimas", "name")
            .column("gyventojai", "population")
    }

    #[test]
    fn test_compile_with_binds() {
        let query = plan()
            .filter(parse("name = 'Vilnius' and population > 1000").unwrap())
            .sort_by("name", Direction::Desc)
            .limit(10)
            .compile(&SqliteDialect)
            .unwrap();
        assert_eq!(
            query.sql,
            "SELECT \"pavadinimas\" AS \"name\", \"gyventojai\" AS \"population\" FROM \"cities\" \
             WHERE (\"pavadinimas\" = ?1 AND \"gyventojai\" > ?2) \
             ORDER BY \"pavadinimas\" DESC NULLS FIRST LIMIT 10"
        );
        assert_eq!(query.params, vec![json!("Vilnius"), json!(1000)]);
    }

    #[test]
    fn test_null_comparison_rewrite() {
        let query = plan()
            .filter(parse("name = null").unwrap())
            .compile(&SqliteDialect)
            .unwrap();
        assert!(query.sql.ends_with("WHERE \"pavadinimas\" IS NULL"));
        assert!(query.params.is_empty());

        let query = plan()
            .filter(parse("name != null").unwrap())
            .compile(&SqliteDialect)
            .unwrap();
        assert!(query.sql.ends_with("IS NOT NULL"));
    }

    #[test]
    fn test_literals_without_binds() {
        let query = plan()
            .filter(parse("name = 'Kaunas'").unwrap())
            .compile(&SasDialect)
            .unwrap();
        assert!(query.sql.contains("WHERE \"PAVADINIMAS\" = 'Kaunas'"));
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_unsupported_expression() {
        let err = plan()
            .filter(parse("upper(name)").unwrap())
            .compile(&SqliteDialect)
            .unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedExpr(_)));
    }

    #[test]
    fn test_parse_sort() {
        assert_eq!(
            parse_sort("-name, code:asc").unwrap(),
            vec![("name".to_string(), Direction::Desc), ("code".to_string(), Direction::Asc)]
        );
        assert!(parse_sort("name:up").is_err());
    }
}
