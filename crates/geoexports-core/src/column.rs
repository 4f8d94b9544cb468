//! Column type definitions for export relations.
//!
//! Column types are introspected from the backing relation on every
//! resolution; the filter vocabulary and the renderers only ever look at the
//! coarse families exposed here.

use serde::{Deserialize, Serialize};

/// Information about a column of an export relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// The column name.
    pub name: String,

    /// The column's data type.
    pub col_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
        }
    }
}

/// Data types an export column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Character data (`text`, `varchar`, `char`).
    #[default]
    Text,

    /// Integer values of any width.
    Integer,

    /// Arbitrary precision and floating point values.
    Decimal,

    Boolean,

    /// Calendar date without time of day.
    Date,

    /// Timestamp with or without time zone.
    Timestamp,

    /// Time of day.
    Time,

    /// `json`, `jsonb` and array columns.
    Json,

    /// PostGIS geometry.
    Geometry,

    /// Anything else (uuid, bytea, ranges...). Compared as text.
    Other,
}

impl ColumnType {
    /// Map a PostgreSQL `information_schema.columns` type to a column type.
    ///
    /// `udt_name` wins for user-defined types such as `geometry`.
    pub fn from_pg_type(data_type: &str, udt_name: &str) -> Self {
        if udt_name.eq_ignore_ascii_case("geometry") || udt_name.eq_ignore_ascii_case("geography")
        {
            return Self::Geometry;
        }
        match data_type.to_ascii_lowercase().as_str() {
            "text" | "character varying" | "character" | "varchar" | "char" | "name"
            | "citext" => Self::Text,
            "smallint" | "integer" | "bigint" => Self::Integer,
            "numeric" | "real" | "double precision" => Self::Decimal,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "timestamp without time zone" | "timestamp with time zone" => Self::Timestamp,
            "time without time zone" | "time with time zone" => Self::Time,
            "json" | "jsonb" | "array" => Self::Json,
            _ => Self::Other,
        }
    }

    /// Whether `ilike` substring matching applies.
    pub fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }

    /// Whether numeric range filters apply.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Decimal)
    }

    /// Whether date filters apply. Timestamps compare on their date part.
    pub fn is_date(self) -> bool {
        matches!(self, Self::Date | Self::Timestamp)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Time => "time",
            Self::Json => "json",
            Self::Geometry => "geometry",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}
