//! Export definitions and their authoring-time validation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of an export definition.
pub type ExportId = i64;

/// Identifier of a role (user or group).
pub type RoleId = i64;

/// Licence attached to an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Licence {
    pub name: String,
    pub url: String,
}

/// Grants `role` read access to `export`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleExportGrant {
    pub role: RoleId,
    pub export: ExportId,
}

/// A named, permission-scoped view over one relation.
///
/// Read-only to the export machinery; definitions are authored elsewhere and
/// checked with [`ExportDefinition::validate`] when they are saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDefinition {
    pub id: ExportId,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schema_name: String,
    pub view_name: String,
    #[serde(default)]
    pub geometry_field: Option<String>,
    #[serde(default)]
    pub geometry_srid: Option<i32>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub licence: Option<Licence>,
    /// Roles holding a grant on this export.
    #[serde(default)]
    pub allowed_roles: BTreeSet<RoleId>,
}

/// Reasons an export definition is rejected at authoring time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("export identifier must be positive, got {0}")]
    InvalidId(ExportId),

    #[error("export label must not be empty")]
    EmptyLabel,

    #[error("invalid {field} '{value}': only letters, digits and underscores are allowed")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("geometry_srid is required when geometry_field is set")]
    MissingSrid,

    #[error("geometry_srid is set but no geometry_field is declared")]
    SridWithoutGeometry,

    #[error("geometry_srid must be positive, got {0}")]
    InvalidSrid(i32),
}

impl ExportDefinition {
    /// Create a definition over `schema.view` with no geometry, private.
    pub fn new(
        id: ExportId,
        label: impl Into<String>,
        schema_name: impl Into<String>,
        view_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            description: None,
            schema_name: schema_name.into(),
            view_name: view_name.into(),
            geometry_field: None,
            geometry_srid: None,
            public: false,
            licence: None,
            allowed_roles: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_geometry(mut self, field: impl Into<String>, srid: i32) -> Self {
        self.geometry_field = Some(field.into());
        self.geometry_srid = Some(srid);
        self
    }

    #[must_use]
    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    #[must_use]
    pub fn with_licence(mut self, licence: Licence) -> Self {
        self.licence = Some(licence);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_grant(mut self, role: RoleId) -> Self {
        self.allowed_roles.insert(role);
        self
    }

    /// Grants carried by this definition.
    pub fn grants(&self) -> impl Iterator<Item = RoleExportGrant> + '_ {
        self.allowed_roles.iter().map(|role| RoleExportGrant {
            role: *role,
            export: self.id,
        })
    }

    /// Check the definition is internally consistent.
    ///
    /// A geometry column and its spatial reference identifier are declared
    /// together or not at all.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.id < 1 {
            return Err(DefinitionError::InvalidId(self.id));
        }
        if self.label.trim().is_empty() {
            return Err(DefinitionError::EmptyLabel);
        }
        check_identifier("schema_name", &self.schema_name)?;
        check_identifier("view_name", &self.view_name)?;

        match (&self.geometry_field, self.geometry_srid) {
            (Some(field), Some(srid)) => {
                check_identifier("geometry_field", field)?;
                if srid <= 0 {
                    return Err(DefinitionError::InvalidSrid(srid));
                }
            }
            (Some(_), None) => return Err(DefinitionError::MissingSrid),
            (None, Some(_)) => return Err(DefinitionError::SridWithoutGeometry),
            (None, None) => {}
        }
        Ok(())
    }
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), DefinitionError> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DefinitionError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> ExportDefinition {
        ExportDefinition::new(1, "Observations", "gn_exports", "v_synthese")
    }

    #[test]
    fn test_valid_definition_without_geometry() {
        assert_eq!(definition().validate(), Ok(()));
    }

    #[test]
    fn test_valid_definition_with_geometry() {
        let def = definition().with_geometry("geom", 4326);
        assert_eq!(def.validate(), Ok(()));
    }

    #[test]
    fn test_geometry_without_srid_rejected() {
        let mut def = definition();
        def.geometry_field = Some("geom".into());
        assert_eq!(def.validate(), Err(DefinitionError::MissingSrid));
    }

    #[test]
    fn test_srid_without_geometry_rejected() {
        let mut def = definition();
        def.geometry_srid = Some(2154);
        assert_eq!(def.validate(), Err(DefinitionError::SridWithoutGeometry));
    }

    #[test]
    fn test_non_positive_id_rejected() {
        let mut def = definition();
        def.id = 0;
        assert_eq!(def.validate(), Err(DefinitionError::InvalidId(0)));
    }

    #[test]
    fn test_unsafe_relation_name_rejected() {
        let def = ExportDefinition::new(3, "x", "public", "v; drop table t");
        assert!(matches!(
            def.validate(),
            Err(DefinitionError::InvalidIdentifier { field: "view_name", .. })
        ));
    }

    #[test]
    fn test_grants_enumerated() {
        let def = definition().with_grant(7).with_grant(3);
        let grants: Vec<_> = def.grants().collect();
        assert_eq!(
            grants,
            vec![
                RoleExportGrant { role: 3, export: 1 },
                RoleExportGrant { role: 7, export: 1 },
            ]
        );
    }
}
