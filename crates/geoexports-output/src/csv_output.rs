//! CSV renderer.

use std::io::Write;

use serde_json::Value;

use crate::{FormatRenderer, RenderInput, Result, bare_geometry, json_value_to_cell};

/// CSV renderer configuration.
#[derive(Debug, Clone)]
pub struct CsvRenderer {
    /// Whether to include a header row.
    pub include_header: bool,

    /// Field delimiter (default: comma).
    pub delimiter: u8,
}

impl Default for CsvRenderer {
    fn default() -> Self {
        Self {
            include_header: true,
            delimiter: b',',
        }
    }
}

impl CsvRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl FormatRenderer for CsvRenderer {
    fn content_type(&self) -> &'static str {
        "text/csv; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "csv"
    }

    fn render(&self, input: &RenderInput<'_>, output: &mut dyn Write) -> Result<()> {
        let descriptor = input.descriptor;
        let geometry = descriptor.geometry_column();
        let mut writer = ::csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .from_writer(output);

        if self.include_header {
            writer.write_record(descriptor.columns.iter().map(|c| c.name.as_str()))?;
        }

        for row in input.rows {
            let record = descriptor.columns.iter().map(|column| {
                if Some(column.name.as_str()) == geometry {
                    json_value_to_cell(&bare_geometry(row, descriptor))
                } else {
                    json_value_to_cell(row.get(&column.name).unwrap_or(&Value::Null))
                }
            });
            writer.write_record(record)?;
        }

        writer.flush()?;
        Ok(())
    }
}
