//! Export relation reads.

use async_trait::async_trait;
use geoexports_core::{ColumnInfo, ColumnType, Row};
use geoexports_storage::{DatasetQuery, QueryBackend, QueryPage, StorageError};
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;
use sqlx_core::row::Row as _;
use sqlx_postgres::{PgArguments, PgPool, Postgres};
use tracing::{debug, instrument, warn};

use crate::error::{PostgresError, is_unreadable_relation};
use crate::sql_builder::{SqlValue, build_dataset_statements};

/// Columns of a table, view, materialized view, foreign or partitioned table.
///
/// Read from `pg_attribute` because `information_schema.columns` omits
/// materialized views. Type names follow `information_schema` spelling.
const DESCRIBE_SQL: &str = "SELECT a.attname::text, \
     CASE WHEN t.typcategory = 'A' THEN 'ARRAY' \
          ELSE format_type(a.atttypid, NULL) END, \
     t.typname::text \
     FROM pg_catalog.pg_attribute a \
     JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     JOIN pg_catalog.pg_type t ON t.oid = a.atttypid \
     WHERE n.nspname = $1 AND c.relname = $2 \
       AND c.relkind IN ('r', 'v', 'm', 'f', 'p') \
       AND a.attnum > 0 AND NOT a.attisdropped \
     ORDER BY a.attnum";

/// [`QueryBackend`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgQueryBackend {
    pool: PgPool,
}

impl PgQueryBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_error(err: sqlx_core::error::Error, schema: &str, relation: &str) -> StorageError {
        if is_unreadable_relation(&err) {
            return StorageError::relation_not_found(schema, relation);
        }
        warn!(error = %err, schema, relation, "export query failed");
        PostgresError::from(err).into()
    }
}

#[async_trait]
impl QueryBackend for PgQueryBackend {
    #[instrument(skip(self))]
    async fn describe(
        &self,
        schema: &str,
        relation: &str,
    ) -> Result<Vec<ColumnInfo>, StorageError> {
        let rows = query::<Postgres>(DESCRIBE_SQL)
            .bind(schema)
            .bind(relation)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::map_error(e, schema, relation))?;

        if rows.is_empty() {
            return Err(StorageError::relation_not_found(schema, relation));
        }

        rows.iter()
            .map(|row| {
                let name: String = row.try_get(0).map_err(PostgresError::from)?;
                let data_type: String = row.try_get(1).map_err(PostgresError::from)?;
                let udt_name: String = row.try_get(2).map_err(PostgresError::from)?;
                Ok(ColumnInfo::new(
                    name,
                    ColumnType::from_pg_type(&data_type, &udt_name),
                ))
            })
            .collect::<Result<Vec<_>, PostgresError>>()
            .map_err(Into::into)
    }

    #[instrument(skip_all, fields(schema = %query.descriptor.schema, relation = %query.descriptor.relation))]
    async fn query(&self, query: &DatasetQuery<'_>) -> Result<QueryPage, StorageError> {
        let descriptor = query.descriptor;
        let (schema, relation) = (&descriptor.schema, &descriptor.relation);
        let stmts = build_dataset_statements(query).map_err(PostgresError::from)?;
        debug!(sql = %stmts.select, params = stmts.filter_params.len(), "running export query");

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::from(PostgresError::from(e)))?;

        let total: i64 = query_scalar::<Postgres, i64>(&stmts.count_total)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Self::map_error(e, schema, relation))?;

        let total_filtered: i64 = query_scalar::<Postgres, i64>(&stmts.count_filtered)
            .bind_all_params(stmts.filter_params.iter())
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Self::map_error(e, schema, relation))?;

        let values: Vec<Value> = query_scalar::<Postgres, Value>(&stmts.select)
            .bind_all_params(stmts.select_params())
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| Self::map_error(e, schema, relation))?;

        let rows = values
            .into_iter()
            .map(|value| match value {
                Value::Object(mut row) => {
                    if let Some(geometry) = &descriptor.geometry
                        && let Some(cell) = row.remove(&geometry.column)
                    {
                        row.insert(geometry.column.clone(), geometry.annotate(cell));
                    }
                    Ok(row)
                }
                other => Err(StorageError::invalid_record(format!(
                    "expected a JSON object row, got {other}"
                ))),
            })
            .collect::<Result<Vec<Row>, StorageError>>()?;

        Ok(QueryPage {
            total: u64::try_from(total).unwrap_or_default(),
            total_filtered: u64::try_from(total_filtered).unwrap_or_default(),
            rows,
        })
    }
}

/// Helper trait to bind all params to a query.
trait BindAllParams<'q> {
    fn bind_all_params(self, params: impl Iterator<Item = &'q SqlValue>) -> Self;
}

impl<'q, O> BindAllParams<'q> for sqlx_core::query_scalar::QueryScalar<'q, Postgres, O, PgArguments> {
    fn bind_all_params(mut self, params: impl Iterator<Item = &'q SqlValue>) -> Self {
        for param in params {
            self = match param {
                SqlValue::Text(s) => self.bind(s.as_str()),
                SqlValue::Integer(i) => self.bind(*i),
                SqlValue::Float(f) => self.bind(*f),
                SqlValue::Boolean(b) => self.bind(*b),
                SqlValue::Date(d) => self.bind(*d),
                SqlValue::Timestamp(t) => self.bind(*t),
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_reads_catalog_for_every_relation_kind() {
        assert!(DESCRIBE_SQL.contains("pg_catalog.pg_attribute"));
        assert!(!DESCRIBE_SQL.contains("information_schema"));
        assert!(DESCRIBE_SQL.contains("c.relkind IN ('r', 'v', 'm', 'f', 'p')"));
        assert!(DESCRIBE_SQL.contains("NOT a.attisdropped"));
    }

    #[test]
    fn test_catalog_type_names_map_like_information_schema() {
        let cases = [
            ("character varying", "varchar", ColumnType::Text),
            ("integer", "int4", ColumnType::Integer),
            ("double precision", "float8", ColumnType::Decimal),
            ("timestamp without time zone", "timestamp", ColumnType::Timestamp),
            ("ARRAY", "_int4", ColumnType::Json),
            ("geometry", "geometry", ColumnType::Geometry),
        ];
        for (data_type, udt_name, expected) in cases {
            assert_eq!(ColumnType::from_pg_type(data_type, udt_name), expected, "{data_type}");
        }
    }
}
