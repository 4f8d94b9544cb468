//! Core model types shared by every geoexports crate.
//!
//! An export is a named, permission-scoped view over a single relation. The
//! types here describe that view ([`ExportDefinition`]), the typed shape of
//! the relation behind it ([`DatasetDescriptor`]) and the identity asking for
//! it ([`Identity`], [`UserRecord`]).

pub mod column;
pub mod descriptor;
pub mod export;
pub mod identity;

pub use column::{ColumnInfo, ColumnType};
pub use descriptor::{DatasetDescriptor, GeometryInfo};
pub use export::{DefinitionError, ExportDefinition, ExportId, Licence, RoleExportGrant, RoleId};
pub use identity::{Identity, UserRecord};

/// A single result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;
