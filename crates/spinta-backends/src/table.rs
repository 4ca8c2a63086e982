//! Table kinds kept per model and their names

use std::fmt;

/// Companion tables a model may own next to its data table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableType {
    Data,
    Changelog,
    Redirect,
    /// Blocks of a `file` property
    File(String),
    /// Items of an `array` property
    List(String),
}

impl TableType {
    pub fn suffix(&self) -> String {
        match self {
            TableType::Data => String::new(),
            TableType::Changelog => "/:changelog".to_string(),
            TableType::Redirect => "/:redirect".to_string(),
            TableType::File(prop) => format!("/:file/{}", prop),
            TableType::List(prop) => format!("/:list/{}", prop),
        }
    }

    /// Split a table name into the model part and its table type
    pub fn split(name: &str) -> (&str, TableType) {
        let Some((model, rest)) = name.split_once("/:") else {
            return (name, TableType::Data);
        };
        let kind = match rest.split_once('/') {
            Some(("file", prop)) => TableType::File(prop.to_string()),
            Some(("list", prop)) => TableType::List(prop.to_string()),
            _ => match rest {
                "changelog" => TableType::Changelog,
                "redirect" => TableType::Redirect,
                _ => return (name, TableType::Data),
            },
        };
        (model, kind)
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableType::Data => f.write_str("data"),
            other => f.write_str(other.suffix().trim_start_matches("/:")),
        }
    }
}

/// A possibly schema-qualified table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Table of `kind` for a model stored under `table`
    pub fn for_model(table: &str, kind: &TableType) -> Self {
        Self::new(format!("{}{}", table, kind.suffix()))
    }

    /// `datasets/gov/example/Country/:redirect` becomes
    /// `"datasets/gov/example"."Country/:redirect"`; names without a
    /// dataset part stay unqualified
    pub fn split_dataset(&self) -> TableName {
        let (model, kind) = TableType::split(&self.name);
        match model.rsplit_once('/') {
            Some((dataset, base)) if self.schema.is_none() => {
                TableName::qualified(dataset, format!("{}{}", base, kind.suffix()))
            }
            _ => self.clone(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_table_names() {
        assert_eq!(TableType::split("ds/City"), ("ds/City", TableType::Data));
        assert_eq!(TableType::split("ds/City/:redirect"), ("ds/City", TableType::Redirect));
        assert_eq!(TableType::split("ds/City/:changelog"), ("ds/City", TableType::Changelog));
        assert_eq!(
            TableType::split("ds/City/:file/image"),
            ("ds/City", TableType::File("image".into()))
        );
        assert_eq!(
            TableType::split("ds/City/:list/tags"),
            ("ds/City", TableType::List("tags".into()))
        );
    }

    #[test]
    fn test_schema_split_keeps_companion_suffix() {
        let table = TableName::new("datasets/gov/example/Country/:list/tags");
        assert_eq!(
            table.split_dataset(),
            TableName::qualified("datasets/gov/example", "Country/:list/tags")
        );
        assert_eq!(TableName::new("Country").split_dataset(), TableName::new("Country"));
    }
}
