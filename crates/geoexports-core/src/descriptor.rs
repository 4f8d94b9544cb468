//! Resolved, typed shape of an export relation.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::column::{ColumnInfo, ColumnType};
use crate::export::{ExportDefinition, ExportId};

/// Geometry column of a relation and its spatial reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryInfo {
    pub column: String,
    pub srid: i32,
}

impl GeometryInfo {
    /// Named CRS member attached to rendered geometries.
    pub fn crs(&self) -> Value {
        json!({
            "type": "name",
            "properties": { "name": format!("EPSG:{}", self.srid) }
        })
    }

    /// Attach the CRS member to a GeoJSON geometry object.
    ///
    /// Non-object values (null, malformed) are returned unchanged.
    pub fn annotate(&self, geometry: Value) -> Value {
        match geometry {
            Value::Object(mut object) => {
                object.insert("crs".to_string(), self.crs());
                Value::Object(object)
            }
            other => other,
        }
    }
}

/// Everything needed to query and document one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub export_id: ExportId,
    pub label: String,
    pub schema: String,
    pub relation: String,
    pub geometry: Option<GeometryInfo>,
    /// Columns in relation order.
    pub columns: Vec<ColumnInfo>,
}

impl DatasetDescriptor {
    /// Build a descriptor from a definition and introspected columns.
    ///
    /// A declared geometry column is typed as geometry even if introspection
    /// reported something coarser.
    pub fn from_definition(definition: &ExportDefinition, mut columns: Vec<ColumnInfo>) -> Self {
        let geometry = match (&definition.geometry_field, definition.geometry_srid) {
            (Some(column), Some(srid)) => Some(GeometryInfo {
                column: column.clone(),
                srid,
            }),
            _ => None,
        };
        if let Some(geometry) = &geometry {
            for column in columns.iter_mut().filter(|c| c.name == geometry.column) {
                column.col_type = ColumnType::Geometry;
            }
        }
        Self {
            export_id: definition.id,
            label: definition.label.clone(),
            schema: definition.schema_name.clone(),
            relation: definition.view_name.clone(),
            geometry,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Name of the geometry column, if any.
    pub fn geometry_column(&self) -> Option<&str> {
        self.geometry.as_ref().map(|g| g.column.as_str())
    }

    /// Columns other than the geometry column.
    pub fn attribute_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        let geometry = self.geometry_column();
        self.columns
            .iter()
            .filter(move |c| Some(c.name.as_str()) != geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_geometry_column_is_typed_geometry() {
        let def = ExportDefinition::new(2, "Sites", "gn_exports", "v_sites").with_geometry("geom", 2154);
        let descriptor = DatasetDescriptor::from_definition(
            &def,
            vec![
                ColumnInfo::new("id", ColumnType::Integer),
                ColumnInfo::new("geom", ColumnType::Other),
            ],
        );

        assert_eq!(descriptor.column("geom").map(|c| c.col_type), Some(ColumnType::Geometry));
        assert_eq!(descriptor.geometry_column(), Some("geom"));
        let attrs: Vec<_> = descriptor.attribute_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(attrs, vec!["id"]);
    }

    #[test]
    fn test_annotate_adds_crs() {
        let info = GeometryInfo { column: "geom".into(), srid: 2154 };
        let geometry = info.annotate(json!({"type": "Point", "coordinates": [1.0, 2.0]}));
        assert_eq!(geometry["crs"]["properties"]["name"], "EPSG:2154");
        assert_eq!(info.annotate(Value::Null), Value::Null);
    }

    #[test]
    fn test_descriptor_without_geometry() {
        let def = ExportDefinition::new(2, "Taxa", "taxonomie", "v_taxref");
        let descriptor =
            DatasetDescriptor::from_definition(&def, vec![ColumnInfo::new("cd_nom", ColumnType::Integer)]);
        assert!(descriptor.geometry.is_none());
        assert!(descriptor.has_column("cd_nom"));
        assert!(!descriptor.has_column("geom"));
    }
}
