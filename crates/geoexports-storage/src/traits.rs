//! Storage traits.

use std::sync::Arc;

use async_trait::async_trait;
use geoexports_core::{ColumnInfo, ExportDefinition, ExportId, RoleId, UserRecord};

use crate::error::StorageError;
use crate::types::{DatasetQuery, QueryPage};

/// Read access to export metadata and users.
///
/// Implementations must be thread-safe (`Send + Sync`) and must not cache
/// grants: authorization reads them on every check.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Reads an export definition, with its licence and granted roles.
    ///
    /// Returns `None` if no such export exists.
    async fn get_export(&self, id: ExportId) -> Result<Option<ExportDefinition>, StorageError>;

    /// Lists every export definition, ordered by identifier.
    async fn list_exports(&self) -> Result<Vec<ExportDefinition>, StorageError>;

    /// Reads a user with its email and group roles.
    ///
    /// Returns `None` if the role is unknown.
    async fn get_user(&self, id_role: RoleId) -> Result<Option<UserRecord>, StorageError>;
}

/// Read access to the relations behind exports.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Lists the columns of `schema.relation` in relation order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::RelationNotFound` if the relation does not exist.
    async fn describe(&self, schema: &str, relation: &str)
    -> Result<Vec<ColumnInfo>, StorageError>;

    /// Runs one read: counts, then the filtered, ordered page of rows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::RelationNotFound` if the relation disappeared.
    async fn query(&self, query: &DatasetQuery<'_>) -> Result<QueryPage, StorageError>;
}

/// Type alias for a shared metadata store.
pub type DynMetadataStore = Arc<dyn MetadataStore>;

/// Type alias for a shared query backend.
pub type DynQueryBackend = Arc<dyn QueryBackend>;
