//! Shapefile export.
//!
//! A shapefile holds a single geometry type, so rows are split by family and
//! each non-empty family gets its own `.shp`/`.shx`/`.dbf`/`.cpg` set (plus a
//! `.prj` when the SRID is known). Rows without a usable geometry keep their
//! attributes in a standalone `<name>_nogeom.dbf`. Everything is packed into
//! one gzip-compressed tar archive.

mod dbf;
mod shp;

pub use dbf::{DbfField, DbfSchema, FieldKind};
pub use shp::{Shape, ShapeFamily, ShapeWriter};

use std::collections::BTreeMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use geoexports_core::Row;
use tracing::{debug, warn};

use crate::{FormatRenderer, RenderError, RenderInput, Result};

const WGS84_WKT: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

const LAMBERT93_WKT: &str = r#"PROJCS["RGF_1993_Lambert_93",GEOGCS["GCS_RGF_1993",DATUM["D_RGF_1993",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Lambert_Conformal_Conic"],PARAMETER["False_Easting",700000.0],PARAMETER["False_Northing",6600000.0],PARAMETER["Central_Meridian",3.0],PARAMETER["Standard_Parallel_1",44.0],PARAMETER["Standard_Parallel_2",49.0],PARAMETER["Latitude_Of_Origin",46.5],UNIT["Meter",1.0]]"#;

/// ESRI WKT for the spatial references we ship a `.prj` for.
pub fn projection_wkt(srid: i32) -> Option<&'static str> {
    match srid {
        4326 => Some(WGS84_WKT),
        2154 => Some(LAMBERT93_WKT),
        _ => None,
    }
}

/// Shapefile sets in a `.tar.gz` archive.
#[derive(Debug, Clone)]
pub struct ShapefileRenderer {
    compression: Compression,
}

impl Default for ShapefileRenderer {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
        }
    }
}

impl ShapefileRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = Compression::new(level);
        self
    }
}

impl FormatRenderer for ShapefileRenderer {
    fn content_type(&self) -> &'static str {
        "application/gzip"
    }

    fn file_extension(&self) -> &'static str {
        "tar.gz"
    }

    fn render(&self, input: &RenderInput<'_>, output: &mut dyn Write) -> Result<()> {
        let descriptor = input.descriptor;
        let Some(geometry) = &descriptor.geometry else {
            return Err(RenderError::MissingGeometry { format: "shp" });
        };

        let mut families: BTreeMap<ShapeFamily, (ShapeWriter, Vec<&Row>)> = BTreeMap::new();
        let mut without_geometry: Vec<&Row> = Vec::new();
        for row in input.rows {
            let shape = row
                .get(&geometry.column)
                .and_then(Shape::from_geojson);
            match shape {
                Some(shape) => {
                    let family = shape.family();
                    let (writer, rows) = families
                        .entry(family)
                        .or_insert_with(|| (ShapeWriter::new(family), Vec::new()));
                    writer.push(&shape);
                    rows.push(row);
                }
                None => without_geometry.push(row),
            }
        }

        if !without_geometry.is_empty() {
            warn!(
                export_id = descriptor.export_id,
                rows = without_geometry.len(),
                "rows without a usable geometry written to the attribute-only table"
            );
        }

        let prj = projection_wkt(geometry.srid);
        if prj.is_none() {
            debug!(srid = geometry.srid, "no projection file for srid");
        }

        let encoder = GzEncoder::new(output, self.compression);
        let mut archive = tar::Builder::new(encoder);

        for (family, (writer, rows)) in families {
            let stem = format!("{}_{}", input.name, family.suffix());
            let schema = DbfSchema::build(descriptor.attribute_columns(), &rows);
            let (shp, shx) = writer.finish();
            append(&mut archive, &format!("{stem}.shp"), &shp)?;
            append(&mut archive, &format!("{stem}.shx"), &shx)?;
            append(&mut archive, &format!("{stem}.dbf"), &schema.write(&rows))?;
            append(&mut archive, &format!("{stem}.cpg"), b"UTF-8")?;
            if let Some(wkt) = prj {
                append(&mut archive, &format!("{stem}.prj"), wkt.as_bytes())?;
            }
        }

        if !without_geometry.is_empty() {
            let schema = DbfSchema::build(descriptor.attribute_columns(), &without_geometry);
            let stem = format!("{}_nogeom", input.name);
            append(&mut archive, &format!("{stem}.dbf"), &schema.write(&without_geometry))?;
            append(&mut archive, &format!("{stem}.cpg"), b"UTF-8")?;
        }

        let encoder = archive.into_inner()?;
        encoder.finish()?.flush()?;
        Ok(())
    }
}

fn append<W: Write>(archive: &mut tar::Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(
        chrono::Utc::now()
            .timestamp()
            .try_into()
            .unwrap_or_default(),
    );
    header.set_cksum();
    archive.append_data(&mut header, path, data)?;
    Ok(())
}
