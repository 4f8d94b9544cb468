//! Export metadata and users.

use async_trait::async_trait;
use geoexports_core::{ExportDefinition, ExportId, Licence, RoleId, UserRecord};
use geoexports_storage::{MetadataStore, StorageError};
use sqlx_core::query::query;
use sqlx_core::row::Row as _;
use sqlx_postgres::{PgPool, PgRow, Postgres};
use tracing::{instrument, warn};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};
use crate::sql_builder::escape_identifier;

/// [`MetadataStore`] over the export and user schemas.
#[derive(Debug, Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
    statements: MetadataStatements,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool, config: &PostgresConfig) -> Result<Self> {
        Ok(Self {
            pool,
            statements: MetadataStatements::new(config)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MetadataStatements {
    export: String,
    list: String,
    user: String,
}

impl MetadataStatements {
    /// Statements for the configured schemas.
    fn new(config: &PostgresConfig) -> Result<Self> {
        let exports = escape_identifier(&config.metadata_schema)?;
        let users = escape_identifier(&config.users_schema)?;

        let select_exports = format!(
            "SELECT e.id::bigint AS id, e.label, e.\"desc\" AS description, e.schema_name, \
             e.view_name, e.geometry_field, e.geometry_srid, COALESCE(e.public, false) AS public, \
             l.name_licence, l.url_licence, \
             COALESCE(array_agg(c.id_role::bigint) FILTER (WHERE c.id_role IS NOT NULL), '{{}}') \
             AS allowed_roles \
             FROM {exports}.t_exports e \
             LEFT JOIN {exports}.t_licences l ON l.id_licence = e.id_licence \
             LEFT JOIN {exports}.cor_exports_roles c ON c.id_export = e.id"
        );
        let group_by = "GROUP BY e.id, l.id_licence";

        Ok(Self {
            export: format!("{select_exports} WHERE e.id = $1 {group_by}"),
            list: format!("{select_exports} {group_by} ORDER BY e.id"),
            user: format!(
                "SELECT r.id_role::bigint AS id_role, r.email, \
                 COALESCE(array_agg(g.id_role_groupe::bigint) \
                 FILTER (WHERE g.id_role_groupe IS NOT NULL), '{{}}') AS groups \
                 FROM {users}.t_roles r \
                 LEFT JOIN {users}.cor_roles g ON g.id_role_utilisateur = r.id_role \
                 WHERE r.id_role = $1 GROUP BY r.id_role"
            ),
        })
    }
}

fn export_from_row(row: &PgRow) -> Result<ExportDefinition> {
    let licence_name: Option<String> = row.try_get("name_licence")?;
    let licence_url: Option<String> = row.try_get("url_licence")?;
    let allowed_roles: Vec<i64> = row.try_get("allowed_roles")?;

    Ok(ExportDefinition {
        id: row.try_get("id")?,
        label: row.try_get("label")?,
        description: row.try_get("description")?,
        schema_name: row.try_get("schema_name")?,
        view_name: row.try_get("view_name")?,
        geometry_field: row.try_get("geometry_field")?,
        geometry_srid: row.try_get("geometry_srid")?,
        public: row.try_get("public")?,
        licence: licence_name.map(|name| Licence {
            name,
            url: licence_url.unwrap_or_default(),
        }),
        allowed_roles: allowed_roles.into_iter().collect(),
    })
}

fn user_from_row(row: &PgRow) -> Result<UserRecord> {
    Ok(UserRecord {
        id_role: row.try_get("id_role")?,
        email: row.try_get("email")?,
        groups: row.try_get("groups")?,
    })
}

fn check_definition(definition: ExportDefinition) -> ExportDefinition {
    if let Err(e) = definition.validate() {
        warn!(export_id = definition.id, error = %e, "stored export definition is inconsistent");
    }
    definition
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self))]
    async fn get_export(&self, id: ExportId) -> std::result::Result<Option<ExportDefinition>, StorageError> {
        let row = query::<Postgres>(&self.statements.export)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;
        row.as_ref()
            .map(export_from_row)
            .transpose()
            .map(|def| def.map(check_definition))
            .map_err(Into::into)
    }

    async fn list_exports(&self) -> std::result::Result<Vec<ExportDefinition>, StorageError> {
        let rows = query::<Postgres>(&self.statements.list)
            .fetch_all(&self.pool)
            .await
            .map_err(PostgresError::from)?;
        rows.iter()
            .map(|row| export_from_row(row).map(check_definition))
            .collect::<Result<Vec<_>>>()
            .map_err(Into::into)
    }

    #[instrument(skip(self))]
    async fn get_user(&self, id_role: RoleId) -> std::result::Result<Option<UserRecord>, StorageError> {
        let row = query::<Postgres>(&self.statements.user)
            .bind(id_role)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(Into::into)
    }
}
