//! Requesting identities.

use serde::{Deserialize, Serialize};

use crate::export::RoleId;

/// The authenticated caller, as forwarded by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id_role: RoleId,
}

impl Identity {
    pub fn new(id_role: RoleId) -> Self {
        Self { id_role }
    }
}

/// A user as held by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id_role: RoleId,
    #[serde(default)]
    pub email: Option<String>,
    /// Group roles the user belongs to.
    #[serde(default)]
    pub groups: Vec<RoleId>,
}

impl UserRecord {
    pub fn new(id_role: RoleId) -> Self {
        Self {
            id_role,
            email: None,
            groups: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_groups(mut self, groups: impl IntoIterator<Item = RoleId>) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }

    /// The user's own role followed by its group roles.
    pub fn roles(&self) -> impl Iterator<Item = RoleId> + '_ {
        std::iter::once(self.id_role).chain(self.groups.iter().copied())
    }

    /// On-file email, ignoring blank values.
    pub fn contact_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}
