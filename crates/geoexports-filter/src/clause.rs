//! Typed filter clauses.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use geoexports_core::ColumnType;
use serde::{Deserialize, Serialize};

use crate::rules::FilterOperator;

/// A literal, typed for the operator and column it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// One predicate over one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub column: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl FilterClause {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }
}

/// Parse `raw` for `operator` over a column of `col_type`.
///
/// On failure returns what was expected, for error reporting.
pub(crate) fn parse_value(
    operator: FilterOperator,
    col_type: ColumnType,
    raw: &str,
) -> Result<FilterValue, &'static str> {
    match operator {
        FilterOperator::ILike => Ok(FilterValue::Text(raw.to_string())),
        FilterOperator::DateGte | FilterOperator::DateLte | FilterOperator::DateEq => {
            parse_date(raw).map(FilterValue::Date).ok_or("a date (YYYY-MM-DD)")
        }
        FilterOperator::NumGte | FilterOperator::NumLte => {
            parse_number(raw).map(FilterValue::Number).ok_or("a number")
        }
        FilterOperator::Equals => parse_equals(col_type, raw),
    }
}

fn parse_equals(col_type: ColumnType, raw: &str) -> Result<FilterValue, &'static str> {
    match col_type {
        ColumnType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(FilterValue::Integer)
            .map_err(|_| "an integer"),
        ColumnType::Decimal => parse_number(raw).map(FilterValue::Number).ok_or("a number"),
        ColumnType::Boolean => parse_bool(raw).map(FilterValue::Boolean).ok_or("a boolean"),
        ColumnType::Date => parse_date(raw).map(FilterValue::Date).ok_or("a date (YYYY-MM-DD)"),
        ColumnType::Timestamp => parse_timestamp(raw)
            .map(FilterValue::Timestamp)
            .or_else(|| parse_date(raw).map(FilterValue::Date))
            .ok_or("a date or date-time"),
        ColumnType::Text
        | ColumnType::Time
        | ColumnType::Json
        | ColumnType::Geometry
        | ColumnType::Other => Ok(FilterValue::Text(raw.to_string())),
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(true),
        "false" | "f" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).map(|t| t.date()))
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}
