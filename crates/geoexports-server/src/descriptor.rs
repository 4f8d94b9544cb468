//! Export id to dataset descriptor resolution.

use geoexports_core::{DatasetDescriptor, ExportDefinition, ExportId};
use geoexports_storage::{DynMetadataStore, DynQueryBackend, StorageError};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no export with id {0}")]
    NotFound(ExportId),

    #[error("relation {schema}.{relation} is missing or unreadable")]
    EmptyDataset { schema: String, relation: String },

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ResolveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RelationNotFound { schema, relation } => {
                Self::EmptyDataset { schema, relation }
            }
            other => Self::Storage(other),
        }
    }
}

/// Builds descriptors by introspecting the backing relation on every call.
#[derive(Clone)]
pub struct DatasetResolver {
    metadata: DynMetadataStore,
    backend: DynQueryBackend,
}

impl DatasetResolver {
    pub fn new(metadata: DynMetadataStore, backend: DynQueryBackend) -> Self {
        Self { metadata, backend }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, export_id: ExportId) -> Result<DatasetDescriptor, ResolveError> {
        let definition = self.definition(export_id).await?;
        self.describe(&definition).await
    }

    pub async fn definition(&self, export_id: ExportId) -> Result<ExportDefinition, ResolveError> {
        self.metadata
            .get_export(export_id)
            .await?
            .ok_or(ResolveError::NotFound(export_id))
    }

    /// Descriptor for a definition already in hand.
    pub async fn describe(
        &self,
        definition: &ExportDefinition,
    ) -> Result<DatasetDescriptor, ResolveError> {
        let columns = self
            .backend
            .describe(&definition.schema_name, &definition.view_name)
            .await?;
        Ok(DatasetDescriptor::from_definition(definition, columns))
    }
}
