//! Logical column types and their warehouse spelling.

use std::fmt;
use std::str::FromStr;

use crate::error::LoaderError;

/// Column types a table config may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Boolean,
    Int,
    Float,
    Timestamp,
    Text,
    LongText,
    Date,
}

impl LogicalType {
    /// Physical type name, spelled the way `pg_catalog.format_type` reports it
    /// so live columns compare equal to their config counterparts.
    pub fn physical(&self) -> &'static str {
        match self {
            LogicalType::Boolean => "boolean",
            LogicalType::Int => "integer",
            LogicalType::Float => "double precision",
            // timestamp with time zone is not supported by the warehouse
            LogicalType::Timestamp => "timestamp without time zone",
            LogicalType::Text => "character varying(256)",
            LogicalType::LongText => "character varying(10000)",
            LogicalType::Date => "date",
        }
    }
}

impl FromStr for LogicalType {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(LogicalType::Boolean),
            "int" => Ok(LogicalType::Int),
            "float" => Ok(LogicalType::Float),
            "timestamp" => Ok(LogicalType::Timestamp),
            "text" => Ok(LogicalType::Text),
            "longtext" => Ok(LogicalType::LongText),
            "date" => Ok(LogicalType::Date),
            other => Err(LoaderError::Config(format!("unknown column type: {}", other))),
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Boolean => "boolean",
            LogicalType::Int => "int",
            LogicalType::Float => "float",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Text => "text",
            LogicalType::LongText => "longtext",
            LogicalType::Date => "date",
        };
        f.write_str(name)
    }
}

/// Maps a logical type name to its physical type.
///
/// Unknown names map to `None`; callers treat that as a configuration error.
pub fn physical_type(logical: &str) -> Option<&'static str> {
    logical.parse::<LogicalType>().ok().map(|t| t.physical())
}

fn is_varchar(physical: &str) -> bool {
    physical.starts_with("character varying")
}

/// Whether two physical types are interchangeable. Two varchars of different
/// lengths still match.
pub fn physical_types_match(input: &str, target: &str) -> bool {
    input == target || (is_varchar(input) && is_varchar(target))
}
