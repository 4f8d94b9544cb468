//! Artifact naming and placement in the exports directory.
//!
//! Writes are blocking; async callers run them on a blocking thread.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDateTime};
use geoexports_core::{DatasetDescriptor, Row};
use tracing::{debug, info, warn};

use crate::{ExportFormat, FormatRenderer, RenderError, RenderInput, Result, renderer_for};

const PART_SUFFIX: &str = ".part";

/// A rendered export, ready to hand to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    /// Public URL of the file.
    pub location: String,
    pub content_type: &'static str,
    pub rows: usize,
}

/// Exports directory and the URL it is published under.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    public_url: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File stem: `<YYYY_MM_DD_HHhMMmSS>_<export id>_<label slug>_<tag>`.
    ///
    /// `tag` identifies the unit of work writing the file, so two jobs
    /// finishing in the same second never share a name.
    pub fn stem(descriptor: &DatasetDescriptor, at: NaiveDateTime, tag: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            at.format("%Y_%m_%d_%Hh%Mm%S"),
            descriptor.export_id,
            slugify(&descriptor.label),
            tag
        )
    }

    /// Public URL for a file in the exports directory.
    pub fn location(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), file_name)
    }

    /// Render `rows` and publish the result.
    ///
    /// The artifact only appears under its final name once fully written;
    /// a failed render leaves nothing behind. An existing file under the
    /// final name is never replaced.
    pub fn write(
        &self,
        descriptor: &DatasetDescriptor,
        format: ExportFormat,
        rows: &[Row],
        tag: &str,
    ) -> Result<Artifact> {
        self.write_at(descriptor, format, rows, Local::now().naive_local(), tag)
    }

    pub fn write_at(
        &self,
        descriptor: &DatasetDescriptor,
        format: ExportFormat,
        rows: &[Row],
        at: NaiveDateTime,
        tag: &str,
    ) -> Result<Artifact> {
        fs::create_dir_all(&self.dir)?;
        let renderer = renderer_for(format);
        let stem = Self::stem(descriptor, at, tag);
        let file_name = format!("{stem}.{}", renderer.file_extension());
        let path = self.dir.join(&file_name);

        // Removed on drop unless persisted.
        let mut part = tempfile::Builder::new()
            .prefix(&format!("{file_name}."))
            .suffix(PART_SUFFIX)
            .tempfile_in(&self.dir)?;

        let input = RenderInput {
            descriptor,
            rows,
            name: &stem,
        };
        render_file(part.as_file_mut(), renderer.as_ref(), &input)?;
        part.persist_noclobber(&path).map_err(|e| {
            warn!(path = %path.display(), error = %e.error, "refusing to replace existing artifact");
            RenderError::from(e.error)
        })?;

        debug!(path = %path.display(), rows = rows.len(), "artifact written");
        Ok(Artifact {
            location: self.location(&file_name),
            path,
            file_name,
            content_type: renderer.content_type(),
            rows: rows.len(),
        })
    }

    /// Delete artifacts (and stale partial files) older than `max_age`.
    ///
    /// Returns the number of files removed. A missing directory is empty.
    pub fn purge_older_than(&self, max_age: Duration) -> std::io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(age) = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default())
            else {
                continue;
            };
            if age > max_age {
                let path = entry.path();
                info!(path = %path.display(), age_hours = age.as_secs() / 3600, "purging expired artifact");
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn render_file(file: &mut File, renderer: &dyn FormatRenderer, input: &RenderInput<'_>) -> Result<()> {
    let mut writer = BufWriter::new(file);
    renderer.render(input, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Lowercase ASCII slug; runs of anything else collapse to one underscore.
fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.chars() {
        let c = fold_accent(c);
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() { "export".to_string() } else { slug.to_string() }
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'â' | 'ä' | 'á' | 'À' | 'Â' | 'Ä' | 'Á' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'î' | 'ï' | 'í' | 'Î' | 'Ï' | 'Í' => 'i',
        'ô' | 'ö' | 'ó' | 'Ô' | 'Ö' | 'Ó' => 'o',
        'ù' | 'û' | 'ü' | 'ú' | 'Ù' | 'Û' | 'Ü' | 'Ú' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use geoexports_core::{ColumnInfo, ColumnType, ExportDefinition};
    use serde_json::json;
    use tempfile::tempdir;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    fn descriptor(label: &str) -> DatasetDescriptor {
        let def = ExportDefinition::new(12, label, "s", "v");
        DatasetDescriptor::from_definition(&def, vec![ColumnInfo::new("id", ColumnType::Integer)])
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Observations Faune"), "observations_faune");
        assert_eq!(slugify("Espèces -- protégées!"), "especes_protegees");
        assert_eq!(slugify("***"), "export");
    }

    #[test]
    fn test_stem_and_location() {
        assert_eq!(
            ArtifactStore::stem(&descriptor("Sites N2000"), at(), "a1b2"),
            "2024_03_09_14h05m07_12_sites_n2000_a1b2"
        );
        let store = ArtifactStore::new("/tmp", "https://example.org/exports/");
        assert_eq!(store.location("a.csv"), "https://example.org/exports/a.csv");
    }

    #[test]
    fn test_write_publishes_complete_file() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("out"), "http://localhost/exports");
        let rows = vec![json!({"id": 1}).as_object().cloned().unwrap()];

        let artifact = store
            .write_at(&descriptor("Obs"), ExportFormat::Csv, &rows, at(), "job1")
            .unwrap();

        assert_eq!(artifact.file_name, "2024_03_09_14h05m07_12_obs_job1.csv");
        assert_eq!(
            artifact.location,
            "http://localhost/exports/2024_03_09_14h05m07_12_obs_job1.csv"
        );
        assert_eq!(artifact.rows, 1);
        assert_eq!(fs::read_to_string(&artifact.path).unwrap(), "id\n1\n");

        let names: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![artifact.file_name.clone()]);
    }

    #[test]
    fn test_failed_render_leaves_nothing() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "http://localhost");

        let err = store
            .write_at(&descriptor("Obs"), ExportFormat::Shapefile, &[], at(), "job1")
            .unwrap_err();

        assert!(matches!(err, crate::RenderError::MissingGeometry { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_same_second_writes_do_not_collide() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "https://x/exports");
        let row = |name: &str| json!({"id": name}).as_object().cloned().unwrap();

        let first = store
            .write_at(&descriptor("Obs"), ExportFormat::Csv, &[row("first job")], at(), "aaaa")
            .unwrap();
        let second = store
            .write_at(&descriptor("Obs"), ExportFormat::Csv, &[row("second job")], at(), "bbbb")
            .unwrap();

        assert_ne!(first.location, second.location);
        assert_eq!(fs::read_to_string(&first.path).unwrap(), "id\nfirst job\n");
        assert_eq!(fs::read_to_string(&second.path).unwrap(), "id\nsecond job\n");
    }

    #[test]
    fn test_existing_artifact_is_never_replaced() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "https://x/exports");
        let row = |name: &str| json!({"id": name}).as_object().cloned().unwrap();

        let first = store
            .write_at(&descriptor("Obs"), ExportFormat::Csv, &[row("kept")], at(), "same")
            .unwrap();
        let err = store
            .write_at(&descriptor("Obs"), ExportFormat::Csv, &[row("lost")], at(), "same")
            .unwrap_err();

        assert!(matches!(err, crate::RenderError::Io(_)));
        assert_eq!(fs::read_to_string(&first.path).unwrap(), "id\nkept\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_purge() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "http://localhost");
        fs::write(dir.path().join("old.csv"), "x").unwrap();

        assert_eq!(store.purge_older_than(Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.purge_older_than(Duration::from_millis(1)).unwrap(), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let missing = ArtifactStore::new(dir.path().join("missing"), "http://localhost");
        assert_eq!(missing.purge_older_than(Duration::ZERO).unwrap(), 0);
    }
}
