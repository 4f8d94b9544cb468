use async_trait::async_trait;
use dashmap::DashMap;
use geoexports_core::{DefinitionError, ExportDefinition, ExportId, RoleId, UserRecord};
use geoexports_storage::{MetadataStore, StorageError};

/// Export definitions and users held in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    exports: DashMap<ExportId, ExportDefinition>,
    users: DashMap<RoleId, UserRecord>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition after validating it.
    pub fn insert_export(&self, definition: ExportDefinition) -> Result<(), DefinitionError> {
        definition.validate()?;
        self.exports.insert(definition.id, definition);
        Ok(())
    }

    pub fn remove_export(&self, id: ExportId) -> Option<ExportDefinition> {
        self.exports.remove(&id).map(|(_, def)| def)
    }

    pub fn insert_user(&self, user: UserRecord) {
        self.users.insert(user.id_role, user);
    }

    /// Grant `role` read access to `export`. Returns `false` if the export is unknown.
    pub fn grant(&self, role: RoleId, export: ExportId) -> bool {
        match self.exports.get_mut(&export) {
            Some(mut def) => {
                def.allowed_roles.insert(role);
                true
            }
            None => false,
        }
    }

    /// Revoke a grant. Returns `true` if it existed.
    pub fn revoke(&self, role: RoleId, export: ExportId) -> bool {
        self.exports
            .get_mut(&export)
            .is_some_and(|mut def| def.allowed_roles.remove(&role))
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_export(&self, id: ExportId) -> Result<Option<ExportDefinition>, StorageError> {
        Ok(self.exports.get(&id).map(|def| def.clone()))
    }

    async fn list_exports(&self) -> Result<Vec<ExportDefinition>, StorageError> {
        let mut exports: Vec<_> = self.exports.iter().map(|e| e.value().clone()).collect();
        exports.sort_by_key(|def| def.id);
        Ok(exports)
    }

    async fn get_user(&self, id_role: RoleId) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.users.get(&id_role).map(|user| user.clone()))
    }
}
