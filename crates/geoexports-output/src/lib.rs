//! Export artifact renderers.
//!
//! Each [`ExportFormat`] has one [`FormatRenderer`] writing a complete
//! artifact for a dataset to any [`std::io::Write`]:
//!
//! - CSV
//! - JSON array
//! - GeoJSON FeatureCollection
//! - Shapefile sets packed in a `.tar.gz` archive
//!
//! [`ArtifactStore`] names artifacts and writes them to the exports
//! directory, returning the location handed to the requester.

mod artifact;
mod csv_output;
mod error;
mod format;
mod json;
pub mod shapefile;

pub use artifact::{Artifact, ArtifactStore};
pub use csv_output::CsvRenderer;
pub use error::{RenderError, Result};
pub use format::ExportFormat;
pub use json::{GeoJsonRenderer, JsonArrayRenderer};
pub use shapefile::ShapefileRenderer;

use std::io::Write;

use geoexports_core::{DatasetDescriptor, Row};
use serde_json::Value;

/// A dataset ready to render.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub descriptor: &'a DatasetDescriptor,
    pub rows: &'a [Row],
    /// Artifact stem, used for names inside multi-file artifacts.
    pub name: &'a str,
}

/// Trait for writing an export artifact in one format.
pub trait FormatRenderer: Send + Sync {
    /// Get the MIME content type for this format.
    fn content_type(&self) -> &'static str;

    /// Get the file extension for this format.
    fn file_extension(&self) -> &'static str;

    /// Write the whole artifact.
    fn render(&self, input: &RenderInput<'_>, output: &mut dyn Write) -> Result<()>;
}

/// Get the renderer for a format.
pub fn renderer_for(format: ExportFormat) -> Box<dyn FormatRenderer> {
    match format {
        ExportFormat::Csv => Box::new(CsvRenderer::new()),
        ExportFormat::Json => Box::new(JsonArrayRenderer::new()),
        ExportFormat::GeoJson => Box::new(GeoJsonRenderer::new()),
        ExportFormat::Shapefile => Box::new(ShapefileRenderer::new()),
    }
}

/// The geometry cell of a row without its CRS member.
pub(crate) fn bare_geometry(row: &Row, descriptor: &DatasetDescriptor) -> Value {
    let Some(column) = descriptor.geometry_column() else {
        return Value::Null;
    };
    match row.get(column) {
        Some(Value::Object(geometry)) => {
            let mut geometry = geometry.clone();
            geometry.remove("crs");
            Value::Object(geometry)
        }
        _ => Value::Null,
    }
}

/// Convert a JSON value to a flat cell string.
pub(crate) fn json_value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(arr) => arr
            .iter()
            .map(json_value_to_cell)
            .collect::<Vec<_>>()
            .join(";"),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
