//! Ordinal node attributes: access and maturity level

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Access is a total order: `private < protected < public < open`.
///
/// Comparisons always go through the derived `Ord`, never through the
/// string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Private,
    Protected,
    Public,
    Open,
}

impl Access {
    pub const ALL: [Access; 4] = [Access::Private, Access::Protected, Access::Public, Access::Open];

    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Private => "private",
            Access::Protected => "protected",
            Access::Public => "public",
            Access::Open => "open",
        }
    }

    /// Effective access along a chain of optional values: the minimum of
    /// the given ones, `protected` when none is given.
    pub fn effective<I>(chain: I) -> Access
    where
        I: IntoIterator<Item = Option<Access>>,
    {
        chain.into_iter().flatten().min().unwrap_or(Access::Protected)
    }
}

impl FromStr for Access {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "private" => Ok(Access::Private),
            "protected" => Ok(Access::Protected),
            "public" => Ok(Access::Public),
            "open" => Ok(Access::Open),
            _ => Err(CoreError::InvalidValue {
                field: "access".into(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data maturity level, 0 through 5
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Level(u8);

impl Level {
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self, CoreError> {
        if value > Self::MAX {
            return Err(CoreError::InvalidValue {
                field: "level".into(),
                value: value.to_string(),
            });
        }
        Ok(Level(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Level {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Level::new(value)
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> u8 {
        level.0
    }
}

impl FromStr for Level {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u8 = s.trim().parse().map_err(|_| CoreError::InvalidValue {
            field: "level".into(),
            value: s.to_string(),
        })?;
        Level::new(value)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_is_ordered() {
        assert!(Access::Private < Access::Protected);
        assert!(Access::Protected < Access::Public);
        assert!(Access::Public < Access::Open);
    }

    #[test]
    fn test_effective_access_takes_minimum() {
        let access = Access::effective([Some(Access::Open), None, Some(Access::Public)]);
        assert_eq!(access, Access::Public);
        assert_eq!(Access::effective([None, None]), Access::Protected);
    }

    #[test]
    fn test_access_parse() {
        assert_eq!("Open".parse::<Access>().unwrap(), Access::Open);
        assert!("everyone".parse::<Access>().is_err());
    }

    #[test]
    fn test_level_bounds() {
        assert_eq!("3".parse::<Level>().unwrap().value(), 3);
        assert!("6".parse::<Level>().is_err());
        assert!("x".parse::<Level>().is_err());
    }
}
