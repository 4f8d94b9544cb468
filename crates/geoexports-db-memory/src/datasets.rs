use async_trait::async_trait;
use dashmap::DashMap;
use geoexports_core::{ColumnInfo, Row};
use geoexports_storage::{DatasetQuery, QueryBackend, QueryPage, SortOrder, StorageError};

#[derive(Debug, Clone)]
struct Relation {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
}

/// Export relations held in memory, keyed by `schema.relation`.
#[derive(Debug, Default)]
pub struct InMemoryDatasets {
    relations: DashMap<String, Relation>,
}

fn key(schema: &str, relation: &str) -> String {
    format!("{schema}.{relation}")
}

impl InMemoryDatasets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a relation. Geometry cells hold GeoJSON geometry objects.
    pub fn insert_relation(
        &self,
        schema: &str,
        relation: &str,
        columns: Vec<ColumnInfo>,
        rows: Vec<Row>,
    ) {
        self.relations
            .insert(key(schema, relation), Relation { columns, rows });
    }

    pub fn drop_relation(&self, schema: &str, relation: &str) -> bool {
        self.relations.remove(&key(schema, relation)).is_some()
    }
}

#[async_trait]
impl QueryBackend for InMemoryDatasets {
    async fn describe(
        &self,
        schema: &str,
        relation: &str,
    ) -> Result<Vec<ColumnInfo>, StorageError> {
        self.relations
            .get(&key(schema, relation))
            .map(|r| r.columns.clone())
            .ok_or_else(|| StorageError::relation_not_found(schema, relation))
    }

    async fn query(&self, query: &DatasetQuery<'_>) -> Result<QueryPage, StorageError> {
        let descriptor = query.descriptor;
        let relation = self
            .relations
            .get(&key(&descriptor.schema, &descriptor.relation))
            .map(|r| r.value().clone())
            .ok_or_else(|| {
                StorageError::relation_not_found(&descriptor.schema, &descriptor.relation)
            })?;

        let total = relation.rows.len() as u64;
        let mut matching: Vec<&Row> = relation
            .rows
            .iter()
            .filter(|row| crate::eval::matches_all(row, query.filters))
            .collect();
        let total_filtered = matching.len() as u64;

        if let Some(sort) = &query.sort {
            matching.sort_by(|a, b| {
                let ordering = crate::eval::compare(a.get(&sort.column), b.get(&sort.column));
                match sort.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        let (skip, take) = match query.pagination {
            Some(p) => (
                usize::try_from(p.offset()).unwrap_or(usize::MAX),
                p.limit as usize,
            ),
            None => (0, usize::MAX),
        };

        let rows: Vec<Row> = matching
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|row| {
                descriptor
                    .columns
                    .iter()
                    .map(|column| {
                        let value = row.get(&column.name).cloned().unwrap_or_default();
                        let value = match &descriptor.geometry {
                            Some(geometry) if geometry.column == column.name => {
                                geometry.annotate(value)
                            }
                            _ => value,
                        };
                        (column.name.clone(), value)
                    })
                    .collect::<Row>()
            })
            .collect();

        Ok(QueryPage {
            total,
            total_filtered,
            rows,
        })
    }
}
