//! Filtered, ordered and paginated reads over an export relation.

use geoexports_core::{DatasetDescriptor, Row};
use geoexports_filter::{DEFAULT_LIMIT, FilterClause, FilterParams};
use geoexports_storage::{
    DatasetQuery, DynQueryBackend, Pagination, QueryPage, SortOrder, SortSpec, StorageError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("relation {schema}.{relation} is missing or unreadable")]
    EmptyDataset { schema: String, relation: String },

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ExecutorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RelationNotFound { schema, relation } => {
                Self::EmptyDataset { schema, relation }
            }
            other => Self::Storage(other),
        }
    }
}

/// Pagination and ordering taken from the reserved request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    /// Zero-based page index.
    pub page: u32,
    pub order_by: Option<String>,
    pub order: SortOrder,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            page: 0,
            order_by: None,
            order: SortOrder::Asc,
        }
    }
}

impl PageRequest {
    /// Read `limit`, `offset`, `orderby` and `order`.
    ///
    /// Unparseable numbers fall back to their defaults; `limit` is clamped
    /// to `1..=max_limit`.
    pub fn from_params(params: &FilterParams, default_limit: u32, max_limit: u32) -> Self {
        let limit = params
            .get("limit")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(i64::from(default_limit))
            .clamp(1, i64::from(max_limit.max(1)));
        let page = params
            .get("offset")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);
        Self {
            limit: u32::try_from(limit).unwrap_or(DEFAULT_LIMIT),
            page,
            order_by: params
                .get("orderby")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            order: SortOrder::parse(params.get("order")),
        }
    }
}

/// One page of an export, as returned by the read endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult {
    pub total: u64,
    pub total_filtered: u64,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<Row>,
}

#[derive(Clone)]
pub struct QueryExecutor {
    backend: DynQueryBackend,
}

impl QueryExecutor {
    pub fn new(backend: DynQueryBackend) -> Self {
        Self { backend }
    }

    #[instrument(skip_all, fields(export_id = descriptor.export_id, limit = request.limit, page = request.page))]
    pub async fn run(
        &self,
        descriptor: &DatasetDescriptor,
        filters: &[FilterClause],
        request: &PageRequest,
    ) -> Result<PageResult, ExecutorError> {
        let query = DatasetQuery::new(descriptor)
            .with_filters(filters)
            .with_sort(sort_spec(descriptor, request))
            .with_pagination(Pagination::new(request.limit, request.page));
        let QueryPage {
            total,
            total_filtered,
            rows,
        } = self.backend.query(&query).await?;
        debug!(total, total_filtered, returned = rows.len(), "page read");
        Ok(PageResult {
            total,
            total_filtered,
            page: request.page,
            limit: request.limit,
            items: rows,
        })
    }

    /// Every matching row, unpaginated.
    #[instrument(skip_all, fields(export_id = descriptor.export_id))]
    pub async fn run_all(
        &self,
        descriptor: &DatasetDescriptor,
        filters: &[FilterClause],
    ) -> Result<QueryPage, ExecutorError> {
        let query = DatasetQuery::new(descriptor).with_filters(filters);
        Ok(self.backend.query(&query).await?)
    }
}

/// Ordering only applies to a real, non-geometry column.
fn sort_spec(descriptor: &DatasetDescriptor, request: &PageRequest) -> Option<SortSpec> {
    let column = request.order_by.as_deref()?;
    if !descriptor.attribute_columns().any(|c| c.name == column) {
        debug!(order_by = %column, "ignoring unknown sort column");
        return None;
    }
    Some(SortSpec {
        column: column.to_string(),
        order: request.order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoexports_core::{ColumnInfo, ColumnType, ExportDefinition};
    use geoexports_db_memory::InMemoryDatasets;
    use geoexports_filter::translate;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (QueryExecutor, DatasetDescriptor) {
        let columns = vec![
            ColumnInfo::new("name", ColumnType::Text),
            ColumnInfo::new("count", ColumnType::Integer),
            ColumnInfo::new("geom", ColumnType::Geometry),
        ];
        let rows = [("Smith", 5), ("BLACKSMITH", 12), ("Smythe", 30), ("Jones", 10)]
            .into_iter()
            .enumerate()
            .map(|(i, (name, count))| {
                json!({
                    "name": name,
                    "count": count,
                    "geom": {"type": "Point", "coordinates": [i as f64, 45.0]},
                })
                .as_object()
                .cloned()
                .unwrap()
            })
            .collect();
        let datasets = Arc::new(InMemoryDatasets::new());
        datasets.insert_relation("gn", "v_obs", columns.clone(), rows);
        let definition =
            ExportDefinition::new(5, "Obs", "gn", "v_obs").with_geometry("geom", 4326);
        (
            QueryExecutor::new(datasets),
            DatasetDescriptor::from_definition(&definition, columns),
        )
    }

    fn names(result: &PageResult) -> Vec<&str> {
        result
            .items
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_page_request_defaults() {
        let request = PageRequest::from_params(&FilterParams::new(), DEFAULT_LIMIT, 10_000);
        assert_eq!(request, PageRequest::default());
    }

    #[test]
    fn test_page_request_clamps_limit() {
        let params = FilterParams::from_query_string("limit=0&offset=2&orderby=count&order=DESC");
        let request = PageRequest::from_params(&params, DEFAULT_LIMIT, 10_000);
        assert_eq!(request.limit, 1);
        assert_eq!(request.page, 2);
        assert_eq!(request.order_by.as_deref(), Some("count"));
        assert_eq!(request.order, SortOrder::Desc);

        let params = FilterParams::from_query_string("limit=50000");
        assert_eq!(PageRequest::from_params(&params, DEFAULT_LIMIT, 10_000).limit, 10_000);

        let params = FilterParams::from_query_string("limit=abc&offset=-1");
        let request = PageRequest::from_params(&params, 250, 10_000);
        assert_eq!(request.limit, 250);
        assert_eq!(request.page, 0);
    }

    #[tokio::test]
    async fn test_numeric_lower_bound() {
        let (executor, descriptor) = setup();
        let filters = translate(
            &FilterParams::from_query_string("filter_n_up_count=10"),
            &descriptor.columns,
        )
        .unwrap();
        let result = executor
            .run(&descriptor, &filters, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(result.total, 4);
        assert_eq!(result.total_filtered, 3);
        assert!(!names(&result).contains(&"Smith"));
    }

    #[tokio::test]
    async fn test_ilike_is_case_insensitive_substring() {
        let (executor, descriptor) = setup();
        let filters = translate(
            &FilterParams::from_query_string("ilikename=smith"),
            &descriptor.columns,
        )
        .unwrap();
        let result = executor
            .run(&descriptor, &filters, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(names(&result), vec!["Smith", "BLACKSMITH"]);
    }

    #[tokio::test]
    async fn test_pagination_and_ordering() {
        let (executor, descriptor) = setup();
        let request = PageRequest {
            limit: 2,
            page: 1,
            order_by: Some("count".into()),
            order: SortOrder::Desc,
        };
        let result = executor.run(&descriptor, &[], &request).await.unwrap();
        assert_eq!(result.page, 1);
        assert_eq!(result.limit, 2);
        assert_eq!(result.total_filtered, 4);
        assert_eq!(names(&result), vec!["Jones", "Smith"]);
    }

    #[tokio::test]
    async fn test_unknown_order_by_is_ignored() {
        let (executor, descriptor) = setup();
        let request = PageRequest {
            order_by: Some("nope".into()),
            ..PageRequest::default()
        };
        let result = executor.run(&descriptor, &[], &request).await.unwrap();
        assert_eq!(result.items.len(), 4);
    }

    #[tokio::test]
    async fn test_geometry_carries_crs() {
        let (executor, descriptor) = setup();
        let result = executor.run_all(&descriptor, &[]).await.unwrap();
        assert_eq!(result.rows[0]["geom"]["crs"]["properties"]["name"], "EPSG:4326");
    }

    #[tokio::test]
    async fn test_missing_relation_is_empty_dataset() {
        let (_, descriptor) = setup();
        let executor = QueryExecutor::new(Arc::new(InMemoryDatasets::new()));
        assert!(matches!(
            executor.run(&descriptor, &[], &PageRequest::default()).await,
            Err(ExecutorError::EmptyDataset { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_matches_is_empty_page() {
        let (executor, descriptor) = setup();
        let filters = translate(
            &FilterParams::from_query_string("name=Nobody"),
            &descriptor.columns,
        )
        .unwrap();
        let result = executor
            .run(&descriptor, &filters, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(result.total_filtered, 0);
        assert!(result.items.is_empty());
    }
}
