//! Parameterized SQL for export reads.
//!
//! Schema and relation names come from configuration and export definitions
//! and must be plain identifiers. Column names come from the catalog and may
//! be any legal quoted identifier. Every user-supplied value is a bind
//! parameter.

use chrono::{NaiveDate, NaiveDateTime};
use geoexports_core::DatasetDescriptor;
use geoexports_filter::{FilterClause, FilterOperator, FilterValue};
use geoexports_storage::DatasetQuery;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlBuilderError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Operator {operator:?} does not take a {value} value")]
    MismatchedValue {
        operator: FilterOperator,
        value: &'static str,
    },
}

/// Validate a configured identifier (schema or relation name).
///
/// Only allows alphanumeric characters and underscores.
fn validate_identifier(name: &str) -> Result<(), SqlBuilderError> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(SqlBuilderError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Quote a catalog identifier, doubling embedded `"`.
///
/// Anything PostgreSQL accepts as a quoted name passes; empty names and NUL do not.
pub fn quote_identifier(name: &str) -> Result<String, SqlBuilderError> {
    if name.is_empty() || name.contains('\0') {
        return Err(SqlBuilderError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Escape a configured identifier: plain names only, then quoted.
pub fn escape_identifier(name: &str) -> Result<String, SqlBuilderError> {
    validate_identifier(name)?;
    quote_identifier(name)
}

/// Qualified `"schema"."relation"`.
pub fn qualified_relation(schema: &str, relation: &str) -> Result<String, SqlBuilderError> {
    Ok(format!(
        "{}.{}",
        escape_identifier(schema)?,
        escape_identifier(relation)?
    ))
}

/// Escape `%`, `_` and `\` so a value matches literally inside `LIKE`.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

/// The three statements behind one export read.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStatements {
    /// `count(*)` over the whole relation, no parameters.
    pub count_total: String,
    /// `count(*)` after filters, bound with `filter_params`.
    pub count_filtered: String,
    /// Rows as JSON objects, bound with `filter_params` then `page_params`.
    pub select: String,
    pub filter_params: Vec<SqlValue>,
    pub page_params: Vec<SqlValue>,
}

impl DatasetStatements {
    /// Parameters for the select statement.
    pub fn select_params(&self) -> impl Iterator<Item = &SqlValue> {
        self.filter_params.iter().chain(self.page_params.iter())
    }
}

/// Build the statements for a read.
pub fn build_dataset_statements(
    query: &DatasetQuery<'_>,
) -> Result<DatasetStatements, SqlBuilderError> {
    let descriptor = query.descriptor;
    let relation = qualified_relation(&descriptor.schema, &descriptor.relation)?;
    let (where_clause, filter_params) = build_where(query.filters)?;
    let projection = build_projection(descriptor)?;

    let mut select = format!(
        "SELECT to_jsonb(t) FROM (SELECT {projection} FROM {relation}{where_clause}) AS t"
    );
    if let Some(sort) = &query.sort {
        select.push_str(&format!(
            " ORDER BY t.{} {} NULLS LAST",
            quote_identifier(&sort.column)?,
            sort.order.as_sql()
        ));
    }

    let mut page_params = Vec::new();
    if let Some(pagination) = query.pagination {
        let next = filter_params.len() + 1;
        select.push_str(&format!(" LIMIT ${} OFFSET ${}", next, next + 1));
        page_params.push(SqlValue::Integer(i64::from(pagination.limit)));
        page_params.push(SqlValue::Integer(
            i64::try_from(pagination.offset()).unwrap_or(i64::MAX),
        ));
    }

    Ok(DatasetStatements {
        count_total: format!("SELECT count(*) FROM {relation}"),
        count_filtered: format!("SELECT count(*) FROM {relation}{where_clause}"),
        select,
        filter_params,
        page_params,
    })
}

fn build_projection(descriptor: &DatasetDescriptor) -> Result<String, SqlBuilderError> {
    let geometry = descriptor.geometry_column();
    let columns = descriptor
        .columns
        .iter()
        .map(|column| {
            let ident = quote_identifier(&column.name)?;
            Ok(if Some(column.name.as_str()) == geometry {
                format!("ST_AsGeoJSON({ident})::jsonb AS {ident}")
            } else {
                ident
            })
        })
        .collect::<Result<Vec<_>, SqlBuilderError>>()?;
    if columns.is_empty() {
        return Ok("*".to_string());
    }
    Ok(columns.join(", "))
}

/// Build ` WHERE ...` (empty without filters) and its parameters, numbered from `$1`.
pub fn build_where(filters: &[FilterClause]) -> Result<(String, Vec<SqlValue>), SqlBuilderError> {
    let mut conditions = Vec::with_capacity(filters.len());
    let mut params = Vec::with_capacity(filters.len());

    for clause in filters {
        let column = quote_identifier(&clause.column)?;
        let placeholder = format!("${}", params.len() + 1);
        let op = clause.operator.as_sql();

        let (condition, param) = match (clause.operator, &clause.value) {
            (FilterOperator::ILike, FilterValue::Text(s)) => (
                format!("{column}::text ILIKE {placeholder} ESCAPE '\\'"),
                SqlValue::Text(format!("%{}%", escape_like(s))),
            ),
            (
                FilterOperator::DateGte | FilterOperator::DateLte | FilterOperator::DateEq,
                FilterValue::Date(d),
            ) => (
                format!("{column}::date {op} {placeholder}"),
                SqlValue::Date(*d),
            ),
            (FilterOperator::NumGte | FilterOperator::NumLte, FilterValue::Number(n)) => (
                format!("{column}::double precision {op} {placeholder}"),
                SqlValue::Float(*n),
            ),
            (FilterOperator::Equals, value) => equals_condition(&column, &placeholder, value),
            (operator, value) => {
                return Err(SqlBuilderError::MismatchedValue {
                    operator,
                    value: value_kind(value),
                });
            }
        };
        conditions.push(condition);
        params.push(param);
    }

    if conditions.is_empty() {
        return Ok((String::new(), params));
    }
    Ok((format!(" WHERE {}", conditions.join(" AND ")), params))
}

fn equals_condition(column: &str, placeholder: &str, value: &FilterValue) -> (String, SqlValue) {
    match value {
        FilterValue::Text(s) => (
            format!("{column}::text = {placeholder}"),
            SqlValue::Text(s.clone()),
        ),
        FilterValue::Integer(i) => (format!("{column} = {placeholder}"), SqlValue::Integer(*i)),
        FilterValue::Number(n) => (
            format!("{column}::double precision = {placeholder}"),
            SqlValue::Float(*n),
        ),
        FilterValue::Boolean(b) => (format!("{column} = {placeholder}"), SqlValue::Boolean(*b)),
        FilterValue::Date(d) => (
            format!("{column}::date = {placeholder}"),
            SqlValue::Date(*d),
        ),
        FilterValue::Timestamp(t) => (
            format!("{column}::timestamp = {placeholder}"),
            SqlValue::Timestamp(*t),
        ),
    }
}

fn value_kind(value: &FilterValue) -> &'static str {
    match value {
        FilterValue::Text(_) => "text",
        FilterValue::Integer(_) => "integer",
        FilterValue::Number(_) => "number",
        FilterValue::Boolean(_) => "boolean",
        FilterValue::Date(_) => "date",
        FilterValue::Timestamp(_) => "timestamp",
    }
}
