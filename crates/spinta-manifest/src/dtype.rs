//! Property data types as written in the `type` column

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Time,
    Datetime,
    Binary,
    Geometry,
    File,
    Image,
    Url,
    Uri,
    Uuid,
    Money,
    Ref,
    Backref,
    Array,
    Object,
    Text,
}

impl DataType {
    pub const ALL: [DataType; 20] = [
        DataType::String,
        DataType::Integer,
        DataType::Number,
        DataType::Boolean,
        DataType::Date,
        DataType::Time,
        DataType::Datetime,
        DataType::Binary,
        DataType::Geometry,
        DataType::File,
        DataType::Image,
        DataType::Url,
        DataType::Uri,
        DataType::Uuid,
        DataType::Money,
        DataType::Ref,
        DataType::Backref,
        DataType::Array,
        DataType::Object,
        DataType::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Datetime => "datetime",
            DataType::Binary => "binary",
            DataType::Geometry => "geometry",
            DataType::File => "file",
            DataType::Image => "image",
            DataType::Url => "url",
            DataType::Uri => "uri",
            DataType::Uuid => "uuid",
            DataType::Money => "money",
            DataType::Ref => "ref",
            DataType::Backref => "backref",
            DataType::Array => "array",
            DataType::Object => "object",
            DataType::Text => "text",
        }
    }

    /// `ref` and `backref` point at another model
    pub fn is_reference(&self) -> bool {
        matches!(self, DataType::Ref | DataType::Backref)
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|dtype| dtype.as_str() == s)
            .ok_or_else(|| format!("unknown type '{}'", s))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `type` cell: `geometry(point, 3346) required unique`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dtype {
    pub kind: DataType,
    /// Geometry shape, e.g. `point`, `polygon`
    pub shape: Option<String>,
    /// Spatial reference id
    pub srid: Option<u32>,
    pub required: bool,
    pub unique: bool,
}

impl Dtype {
    pub fn new(kind: DataType) -> Self {
        Self {
            kind,
            shape: None,
            srid: None,
            required: false,
            unique: false,
        }
    }

    pub fn parse(cell: &str) -> Result<Self, String> {
        let cell = cell.trim();
        let (head, modifiers) = match cell.find(')') {
            Some(close) => (&cell[..=close], &cell[close + 1..]),
            None => match cell.find(char::is_whitespace) {
                Some(space) => (&cell[..space], &cell[space..]),
                None => (cell, ""),
            },
        };

        let (name, args) = match head.find('(') {
            Some(open) if head.ends_with(')') => {
                (head[..open].trim(), Some(&head[open + 1..head.len() - 1]))
            }
            Some(_) => return Err(format!("unbalanced parentheses in '{}'", cell)),
            None => (head.trim(), None),
        };

        let mut dtype = Dtype::new(name.parse()?);

        if let Some(args) = args {
            if dtype.kind != DataType::Geometry {
                return Err(format!("type '{}' takes no arguments", name));
            }
            for arg in args.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                match arg.parse::<u32>() {
                    Ok(srid) if dtype.srid.is_none() => dtype.srid = Some(srid),
                    Ok(_) => return Err(format!("duplicate srid in '{}'", cell)),
                    Err(_) if dtype.shape.is_none() && dtype.srid.is_none() => {
                        dtype.shape = Some(arg.to_lowercase())
                    }
                    Err(_) => return Err(format!("invalid geometry argument '{}'", arg)),
                }
            }
        }

        for modifier in modifiers.split_whitespace() {
            match modifier {
                "required" => dtype.required = true,
                "unique" => dtype.unique = true,
                other => return Err(format!("unknown type modifier '{}'", other)),
            }
        }

        Ok(dtype)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        match (&self.shape, self.srid) {
            (Some(shape), Some(srid)) => write!(f, "({}, {})", shape, srid)?,
            (Some(shape), None) => write!(f, "({})", shape)?,
            (None, Some(srid)) => write!(f, "({})", srid)?,
            (None, None) => {}
        }
        if self.required {
            f.write_str(" required")?;
        }
        if self.unique {
            f.write_str(" unique")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_types() {
        assert_eq!(Dtype::parse("string").unwrap(), Dtype::new(DataType::String));
        assert!(Dtype::parse("varchar").is_err());
    }

    #[test]
    fn test_modifiers() {
        let dtype = Dtype::parse("integer required unique").unwrap();
        assert!(dtype.required && dtype.unique);
        assert_eq!(dtype.to_string(), "integer required unique");
        assert!(Dtype::parse("integer nullable").is_err());
    }

    #[test]
    fn test_geometry_arguments() {
        let dtype = Dtype::parse("geometry(point, 3346) required").unwrap();
        assert_eq!(dtype.shape.as_deref(), Some("point"));
        assert_eq!(dtype.srid, Some(3346));
        assert!(dtype.required);
        assert_eq!(dtype.to_string(), "geometry(point, 3346) required");

        let srid_only = Dtype::parse("geometry(4326)").unwrap();
        assert_eq!(srid_only.srid, Some(4326));
        assert_eq!(srid_only.to_string(), "geometry(4326)");
    }

    #[test]
    fn test_arguments_only_for_geometry() {
        assert!(Dtype::parse("string(10)").is_err());
        assert!(Dtype::parse("geometry(point").is_err());
    }
}
