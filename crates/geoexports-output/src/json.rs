//! JSON and GeoJSON renderers.
//!
//! Both stream one row at a time instead of building the whole document.

use std::io::Write;

use serde_json::{Map, Value, json};

use crate::{FormatRenderer, RenderInput, Result, bare_geometry};

/// JSON array of row objects.
#[derive(Debug, Clone, Default)]
pub struct JsonArrayRenderer;

impl JsonArrayRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl FormatRenderer for JsonArrayRenderer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, input: &RenderInput<'_>, output: &mut dyn Write) -> Result<()> {
        output.write_all(b"[")?;
        for (i, row) in input.rows.iter().enumerate() {
            if i > 0 {
                output.write_all(b",")?;
            }
            serde_json::to_writer(&mut *output, row)?;
        }
        output.write_all(b"]")?;
        output.flush()?;
        Ok(())
    }
}

/// GeoJSON FeatureCollection.
///
/// The geometry column becomes the feature geometry and the remaining columns
/// its properties. The collection carries a named CRS member when the export
/// declares a spatial reference.
#[derive(Debug, Clone, Default)]
pub struct GeoJsonRenderer;

impl GeoJsonRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl FormatRenderer for GeoJsonRenderer {
    fn content_type(&self) -> &'static str {
        "application/geo+json"
    }

    fn file_extension(&self) -> &'static str {
        "geojson"
    }

    fn render(&self, input: &RenderInput<'_>, output: &mut dyn Write) -> Result<()> {
        let descriptor = input.descriptor;
        output.write_all(br#"{"type":"FeatureCollection","#)?;
        if let Some(geometry) = &descriptor.geometry {
            output.write_all(br#""crs":"#)?;
            serde_json::to_writer(&mut *output, &geometry.crs())?;
            output.write_all(b",")?;
        }
        output.write_all(br#""features":["#)?;

        for (i, row) in input.rows.iter().enumerate() {
            if i > 0 {
                output.write_all(b",")?;
            }
            let properties: Map<String, Value> = descriptor
                .attribute_columns()
                .map(|c| (c.name.clone(), row.get(&c.name).cloned().unwrap_or_default()))
                .collect();
            let feature = json!({
                "type": "Feature",
                "geometry": bare_geometry(row, descriptor),
                "properties": properties,
            });
            serde_json::to_writer(&mut *output, &feature)?;
        }

        output.write_all(b"]}")?;
        output.flush()?;
        Ok(())
    }
}
