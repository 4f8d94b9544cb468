//! Export access decisions.
//!
//! Grants and visibility are read from the metadata store on every call;
//! nothing is cached between requests.

use std::collections::BTreeSet;

use geoexports_core::{ExportDefinition, ExportId, Identity, RoleId};
use geoexports_storage::{DynMetadataStore, StorageError};
use tracing::{debug, instrument};

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied,
}

/// Access check that also hands back the definition it looked at.
#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Allowed(ExportDefinition),
    Denied,
    UnknownExport,
}

impl Authorization {
    pub fn decision(&self) -> AccessDecision {
        match self {
            Self::Allowed(_) => AccessDecision::Allowed,
            Self::Denied | Self::UnknownExport => AccessDecision::Denied,
        }
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    metadata: DynMetadataStore,
}

impl AuthorizationGate {
    pub fn new(metadata: DynMetadataStore) -> Self {
        Self { metadata }
    }

    /// Allowed iff the export is public or one of the identity's roles holds a grant.
    pub async fn check(
        &self,
        export_id: ExportId,
        identity: Identity,
    ) -> Result<AccessDecision, StorageError> {
        Ok(self.authorize(export_id, identity).await?.decision())
    }

    #[instrument(skip(self), fields(id_role = identity.id_role))]
    pub async fn authorize(
        &self,
        export_id: ExportId,
        identity: Identity,
    ) -> Result<Authorization, StorageError> {
        let Some(definition) = self.metadata.get_export(export_id).await? else {
            debug!("export does not exist");
            return Ok(Authorization::UnknownExport);
        };
        if definition.public {
            return Ok(Authorization::Allowed(definition));
        }
        let roles = self.roles_of(identity).await?;
        if is_granted(&definition, &roles) {
            Ok(Authorization::Allowed(definition))
        } else {
            debug!("no grant for identity");
            Ok(Authorization::Denied)
        }
    }

    /// Every export the identity may read, in id order.
    pub async fn allowed_exports(
        &self,
        identity: Identity,
    ) -> Result<Vec<ExportDefinition>, StorageError> {
        let roles = self.roles_of(identity).await?;
        let mut exports: Vec<_> = self
            .metadata
            .list_exports()
            .await?
            .into_iter()
            .filter(|definition| definition.public || is_granted(definition, &roles))
            .collect();
        exports.sort_by_key(|definition| definition.id);
        Ok(exports)
    }

    /// The identity's own role plus its group roles. Unknown users only carry their own.
    async fn roles_of(&self, identity: Identity) -> Result<BTreeSet<RoleId>, StorageError> {
        Ok(match self.metadata.get_user(identity.id_role).await? {
            Some(user) => user.roles().collect(),
            None => BTreeSet::from([identity.id_role]),
        })
    }
}

fn is_granted(definition: &ExportDefinition, roles: &BTreeSet<RoleId>) -> bool {
    !definition.allowed_roles.is_disjoint(roles)
}
