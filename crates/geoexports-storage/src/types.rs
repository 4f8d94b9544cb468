//! Query request and result types.

use geoexports_core::{DatasetDescriptor, Row};
use geoexports_filter::FilterClause;
use serde::{Deserialize, Serialize};

/// Sort order for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Descending only for `desc`; anything else sorts ascending.
    pub fn parse(direction: Option<&str>) -> Self {
        match direction {
            Some(d) if d.eq_ignore_ascii_case("desc") => Self::Desc,
            _ => Self::Asc,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Order rows by one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub order: SortOrder,
}

/// Page of `limit` rows; `page` is zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub page: u32,
}

impl Pagination {
    pub fn new(limit: u32, page: u32) -> Self {
        Self {
            limit: limit.max(1),
            page,
        }
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.limit)
    }
}

/// One read over an export relation.
#[derive(Debug, Clone)]
pub struct DatasetQuery<'a> {
    pub descriptor: &'a DatasetDescriptor,
    pub filters: &'a [FilterClause],
    pub sort: Option<SortSpec>,
    /// `None` reads every matching row.
    pub pagination: Option<Pagination>,
}

impl<'a> DatasetQuery<'a> {
    pub fn new(descriptor: &'a DatasetDescriptor) -> Self {
        Self {
            descriptor,
            filters: &[],
            sort: None,
            pagination: None,
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: &'a [FilterClause]) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: Option<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

/// Result of one read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    /// Rows in the relation.
    pub total: u64,
    /// Rows matching the filters, before pagination.
    pub total_filtered: u64,
    pub rows: Vec<Row>,
}
