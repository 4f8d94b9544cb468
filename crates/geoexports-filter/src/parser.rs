//! Parameter name → filter clause translation.

use geoexports_core::ColumnInfo;

use crate::clause::{FilterClause, parse_value};
use crate::error::{ClauseError, FilterError};
use crate::params::FilterParams;
use crate::rules::{FILTER_RULES, FilterRule, equals_rule, is_reserved};

/// Find the rule and column a parameter name designates.
///
/// An exact column name always means equality. Otherwise the prefixed rules
/// are tried; a prefix only counts when the remainder names a column of a
/// type the rule applies to. Returns `None` for anything else.
pub fn match_parameter<'c>(
    name: &str,
    columns: &'c [ColumnInfo],
) -> Option<(&'static FilterRule, &'c ColumnInfo)> {
    let find = |column: &str| columns.iter().find(|c| c.name == column);

    if let Some(column) = find(name) {
        return Some((equals_rule(), column));
    }

    FILTER_RULES
        .iter()
        .filter(|rule| !rule.prefix.is_empty())
        .find_map(|rule| {
            let column = find(name.strip_prefix(rule.prefix)?)?;
            rule.applies_to(column.col_type).then_some((rule, column))
        })
}

/// Translate raw request parameters into filter clauses.
///
/// Reserved names (`limit`, `offset`, `orderby`, `order`) and names that do
/// not designate a column are skipped. Every malformed value for a known
/// column is reported; any such error fails the whole translation.
pub fn translate(
    params: &FilterParams,
    columns: &[ColumnInfo],
) -> Result<Vec<FilterClause>, FilterError> {
    let mut clauses = Vec::new();
    let mut errors = Vec::new();

    for (name, raw) in params.iter() {
        if is_reserved(name) {
            continue;
        }
        let Some((rule, column)) = match_parameter(name, columns) else {
            tracing::trace!(param = %name, "ignoring parameter that names no column");
            continue;
        };
        match parse_value(rule.operator, column.col_type, raw) {
            Ok(value) => clauses.push(FilterClause::new(&column.name, rule.operator, value)),
            Err(expected) => errors.push(ClauseError {
                param: name.to_string(),
                column: column.name.clone(),
                value: raw.to_string(),
                expected,
            }),
        }
    }

    if errors.is_empty() {
        Ok(clauses)
    } else {
        Err(FilterError::InvalidFilter(errors))
    }
}
