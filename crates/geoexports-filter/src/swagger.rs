//! Swagger parameter descriptors derived from the filter vocabulary.

use std::collections::HashSet;

use geoexports_core::{ColumnType, DatasetDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::parser::match_parameter;
use crate::rules::{FILTER_RULES, FilterOperator, FilterRule, is_reserved};

/// Page size used when a request does not give one.
pub const DEFAULT_LIMIT: u32 = 1000;

/// A Swagger 2.0 query parameter object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    pub description: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterDescriptor {
    fn query(name: impl Into<String>, description: impl Into<String>, param_type: &str) -> Self {
        Self {
            name: name.into(),
            location: "query".to_string(),
            description: description.into(),
            required: false,
            param_type: param_type.to_string(),
            format: None,
            allowed: None,
            default: None,
        }
    }

    fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }
}

/// Document every parameter an export accepts.
///
/// One descriptor per column and type-compatible rule, in column order, then
/// the fixed `limit`, `offset`, `orderby` and `order` parameters. Depends on
/// nothing but its inputs.
///
/// A name is only documented when [`translate`](crate::translate) would read
/// it as that same rule on that same column: reserved names and names
/// claimed by another column are left out.
pub fn parameters_for(descriptor: &DatasetDescriptor, default_limit: u32) -> Vec<ParameterDescriptor> {
    let mut seen = HashSet::new();
    let mut parameters = Vec::new();

    for column in &descriptor.columns {
        for rule in FILTER_RULES.iter().filter(|r| r.applies_to(column.col_type)) {
            let name = rule.parameter_name(&column.name);
            if is_reserved(&name) {
                continue;
            }
            let executes_as = match_parameter(&name, &descriptor.columns);
            if !matches!(executes_as, Some((r, c)) if r.operator == rule.operator && c.name == column.name)
            {
                continue;
            }
            if seen.insert(name) {
                parameters.push(filter_parameter(rule, &column.name, column.col_type));
            }
        }
    }

    parameters.extend(fixed_parameters(descriptor, default_limit));
    parameters
}

fn filter_parameter(rule: &FilterRule, column: &str, col_type: ColumnType) -> ParameterDescriptor {
    let name = rule.parameter_name(column);
    let description = rule.describe(column);
    match rule.operator {
        FilterOperator::ILike => ParameterDescriptor::query(name, description, "string"),
        FilterOperator::DateGte | FilterOperator::DateLte | FilterOperator::DateEq => {
            ParameterDescriptor::query(name, description, "string").with_format("date")
        }
        FilterOperator::NumGte | FilterOperator::NumLte => {
            ParameterDescriptor::query(name, description, "number")
        }
        FilterOperator::Equals => match col_type {
            ColumnType::Integer => ParameterDescriptor::query(name, description, "integer"),
            ColumnType::Decimal => ParameterDescriptor::query(name, description, "number"),
            ColumnType::Boolean => ParameterDescriptor::query(name, description, "boolean"),
            ColumnType::Date => {
                ParameterDescriptor::query(name, description, "string").with_format("date")
            }
            ColumnType::Timestamp => {
                ParameterDescriptor::query(name, description, "string").with_format("date-time")
            }
            _ => ParameterDescriptor::query(name, description, "string"),
        },
    }
}

fn fixed_parameters(descriptor: &DatasetDescriptor, default_limit: u32) -> Vec<ParameterDescriptor> {
    let mut limit = ParameterDescriptor::query("limit", "Maximum number of rows returned", "integer");
    limit.default = Some(json!(default_limit));

    let mut offset = ParameterDescriptor::query("offset", "Page number, starting at 0", "integer");
    offset.default = Some(json!(0));

    let mut orderby = ParameterDescriptor::query("orderby", "Column to sort rows by", "string");
    orderby.allowed = Some(
        descriptor
            .attribute_columns()
            .map(|c| c.name.clone())
            .collect(),
    );

    let mut order = ParameterDescriptor::query("order", "Sort direction", "string");
    order.allowed = Some(vec!["asc".to_string(), "desc".to_string()]);
    order.default = Some(json!("asc"));

    vec![limit, offset, orderby, order]
}
