//! The filter vocabulary.
//!
//! One table, read by the translator and by the parameter generator.

use geoexports_core::ColumnType;
use serde::{Deserialize, Serialize};

/// Parameter names that never become filters.
pub const RESERVED_PARAMS: &[&str] = &["limit", "offset", "orderby", "order"];

/// Whether `name` is a reserved pagination/ordering parameter.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_PARAMS.contains(&name)
}

/// Predicate selected by a parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// `<col>=val`
    Equals,
    /// `ilike<col>=val`, case-insensitive substring
    ILike,
    /// `filter_d_up_<col>=val`
    DateGte,
    /// `filter_d_lo_<col>=val`
    DateLte,
    /// `filter_d_eq_<col>=val`
    DateEq,
    /// `filter_n_up_<col>=val`
    NumGte,
    /// `filter_n_lo_<col>=val`
    NumLte,
}

impl FilterOperator {
    /// Get the SQL operator string.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Equals | Self::DateEq => "=",
            Self::ILike => "ILIKE",
            Self::DateGte | Self::NumGte => ">=",
            Self::DateLte | Self::NumLte => "<=",
        }
    }
}

/// Column types a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFamily {
    Any,
    Text,
    Date,
    Numeric,
}

impl ColumnFamily {
    pub fn accepts(self, col_type: ColumnType) -> bool {
        match self {
            Self::Any => true,
            Self::Text => col_type.is_text(),
            Self::Date => col_type.is_date(),
            Self::Numeric => col_type.is_numeric(),
        }
    }
}

/// One row of the filter vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterRule {
    /// Parameter name prefix; empty for plain equality.
    pub prefix: &'static str,
    pub operator: FilterOperator,
    pub family: ColumnFamily,
    /// Documentation text; `{column}` is replaced by the column name.
    pub description: &'static str,
}

impl FilterRule {
    /// Parameter name this rule gives `column`.
    pub fn parameter_name(&self, column: &str) -> String {
        format!("{}{}", self.prefix, column)
    }

    pub fn describe(&self, column: &str) -> String {
        self.description.replace("{column}", column)
    }

    pub fn applies_to(&self, col_type: ColumnType) -> bool {
        self.family.accepts(col_type)
    }
}

/// The filter vocabulary, equality first.
pub const FILTER_RULES: &[FilterRule] = &[
    FilterRule {
        prefix: "",
        operator: FilterOperator::Equals,
        family: ColumnFamily::Any,
        description: "Rows where {column} equals the given value",
    },
    FilterRule {
        prefix: "ilike",
        operator: FilterOperator::ILike,
        family: ColumnFamily::Text,
        description: "Rows where {column} contains the given text, ignoring case",
    },
    FilterRule {
        prefix: "filter_d_up_",
        operator: FilterOperator::DateGte,
        family: ColumnFamily::Date,
        description: "Rows where {column} is on or after the given date (YYYY-MM-DD)",
    },
    FilterRule {
        prefix: "filter_d_lo_",
        operator: FilterOperator::DateLte,
        family: ColumnFamily::Date,
        description: "Rows where {column} is on or before the given date (YYYY-MM-DD)",
    },
    FilterRule {
        prefix: "filter_d_eq_",
        operator: FilterOperator::DateEq,
        family: ColumnFamily::Date,
        description: "Rows where {column} falls on the given date (YYYY-MM-DD)",
    },
    FilterRule {
        prefix: "filter_n_up_",
        operator: FilterOperator::NumGte,
        family: ColumnFamily::Numeric,
        description: "Rows where {column} is greater than or equal to the given number",
    },
    FilterRule {
        prefix: "filter_n_lo_",
        operator: FilterOperator::NumLte,
        family: ColumnFamily::Numeric,
        description: "Rows where {column} is less than or equal to the given number",
    },
];

/// The plain equality rule.
pub fn equals_rule() -> &'static FilterRule {
    &FILTER_RULES[0]
}
