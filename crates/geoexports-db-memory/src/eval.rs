//! Filter evaluation and ordering over JSON rows.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime};
use geoexports_core::Row;
use geoexports_filter::{FilterClause, FilterOperator, FilterValue};
use serde_json::Value;

/// Whether `row` satisfies every clause.
pub(crate) fn matches_all(row: &Row, clauses: &[FilterClause]) -> bool {
    clauses
        .iter()
        .all(|clause| row.get(&clause.column).is_some_and(|v| matches(v, clause)))
}

fn matches(value: &Value, clause: &FilterClause) -> bool {
    if value.is_null() {
        return false;
    }
    match (clause.operator, &clause.value) {
        (FilterOperator::ILike, FilterValue::Text(needle)) => as_text(value)
            .to_lowercase()
            .contains(&needle.to_lowercase()),
        (FilterOperator::DateGte, FilterValue::Date(d)) => as_date(value).is_some_and(|v| v >= *d),
        (FilterOperator::DateLte, FilterValue::Date(d)) => as_date(value).is_some_and(|v| v <= *d),
        (FilterOperator::DateEq, FilterValue::Date(d)) => as_date(value).is_some_and(|v| v == *d),
        (FilterOperator::NumGte, FilterValue::Number(n)) => value.as_f64().is_some_and(|v| v >= *n),
        (FilterOperator::NumLte, FilterValue::Number(n)) => value.as_f64().is_some_and(|v| v <= *n),
        (FilterOperator::Equals, expected) => equals(value, expected),
        _ => false,
    }
}

fn equals(value: &Value, expected: &FilterValue) -> bool {
    match expected {
        FilterValue::Text(s) => as_text(value) == *s,
        FilterValue::Integer(i) => value.as_i64() == Some(*i),
        FilterValue::Number(n) => value.as_f64() == Some(*n),
        FilterValue::Boolean(b) => value.as_bool() == Some(*b),
        FilterValue::Date(d) => as_date(value) == Some(*d),
        FilterValue::Timestamp(t) => as_timestamp(value) == Some(*t),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?;
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}

fn as_timestamp(value: &Value) -> Option<NaiveDateTime> {
    let s = value.as_str()?;
    NaiveDateTime::parse_from_str(s.get(..19)?, "%Y-%m-%dT%H:%M:%S").ok()
}

/// Order two cells, nulls last.
pub(crate) fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => match (a.as_bool(), b.as_bool()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => as_text(a).cmp(&as_text(b)),
            },
        },
    }
}
