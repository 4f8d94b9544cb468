//! dBase III attribute tables.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Utc};
use geoexports_core::{ColumnInfo, ColumnType, Row};
use serde_json::Value;

use crate::json_value_to_cell;

const MAX_NAME_LEN: usize = 10;
const MAX_CHAR_LEN: usize = 254;
const INTEGER_LEN: u8 = 18;
const DECIMAL_LEN: u8 = 24;
const DECIMAL_PLACES: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Character,
    Numeric,
    Logical,
    Date,
}

impl FieldKind {
    fn code(&self) -> u8 {
        match self {
            Self::Character => b'C',
            Self::Numeric => b'N',
            Self::Logical => b'L',
            Self::Date => b'D',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfField {
    /// Name as stored in the table, at most ten bytes.
    pub name: String,
    /// Row key the value is read from.
    pub column: String,
    pub kind: FieldKind,
    pub length: u8,
    pub decimals: u8,
}

/// Field layout for a set of rows.
#[derive(Debug, Clone)]
pub struct DbfSchema {
    fields: Vec<DbfField>,
}

impl DbfSchema {
    /// Lay out `columns`, sizing character fields on the widest value in
    /// `rows`.
    pub fn build<'a>(columns: impl IntoIterator<Item = &'a ColumnInfo>, rows: &[&Row]) -> Self {
        let mut taken = HashSet::new();
        let fields = columns
            .into_iter()
            .map(|column| {
                let name = field_name(&column.name, &mut taken);
                let (kind, length, decimals) = match column.col_type {
                    ColumnType::Integer => (FieldKind::Numeric, INTEGER_LEN, 0),
                    ColumnType::Decimal => (FieldKind::Numeric, DECIMAL_LEN, DECIMAL_PLACES),
                    ColumnType::Boolean => (FieldKind::Logical, 1, 0),
                    ColumnType::Date => (FieldKind::Date, 8, 0),
                    _ => (FieldKind::Character, char_width(&column.name, rows), 0),
                };
                DbfField {
                    name,
                    column: column.name.clone(),
                    kind,
                    length,
                    decimals,
                }
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[DbfField] {
        &self.fields
    }

    fn record_len(&self) -> usize {
        1 + self.fields.iter().map(|f| usize::from(f.length)).sum::<usize>()
    }

    /// Complete `.dbf` file contents.
    pub fn write(&self, rows: &[&Row]) -> Vec<u8> {
        self.write_dated(rows, Utc::now().date_naive())
    }

    fn write_dated(&self, rows: &[&Row], updated: NaiveDate) -> Vec<u8> {
        let header_len = 32 + 32 * self.fields.len() + 1;
        let record_len = self.record_len();
        let mut out = Vec::with_capacity(header_len + record_len * rows.len() + 1);

        out.push(0x03);
        out.push(u8::try_from(updated.year() - 1900).unwrap_or(0));
        out.push(u8::try_from(updated.month()).unwrap_or(1));
        out.push(u8::try_from(updated.day()).unwrap_or(1));
        out.extend_from_slice(&u32::try_from(rows.len()).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&u16::try_from(header_len).unwrap_or(u16::MAX).to_le_bytes());
        out.extend_from_slice(&u16::try_from(record_len).unwrap_or(u16::MAX).to_le_bytes());
        out.extend_from_slice(&[0u8; 20]);

        for field in &self.fields {
            let mut name = [0u8; 11];
            name[..field.name.len()].copy_from_slice(field.name.as_bytes());
            out.extend_from_slice(&name);
            out.push(field.kind.code());
            out.extend_from_slice(&[0u8; 4]);
            out.push(field.length);
            out.push(field.decimals);
            out.extend_from_slice(&[0u8; 14]);
        }
        out.push(0x0D);

        for row in rows {
            out.push(b' ');
            for field in &self.fields {
                let value = row.get(&field.column).unwrap_or(&Value::Null);
                out.extend_from_slice(&encode_value(field, value));
            }
        }
        out.push(0x1A);
        out
    }
}

/// ASCII, at most ten bytes, unique within the table.
fn field_name(column: &str, taken: &mut HashSet<String>) -> String {
    let base: String = column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();
    let base = if base.is_empty() { "field".to_string() } else { base };

    let mut candidate = base.clone();
    let mut n = 1usize;
    while !taken.insert(candidate.to_ascii_lowercase()) {
        let suffix = n.to_string();
        let keep = MAX_NAME_LEN.saturating_sub(suffix.len());
        candidate = format!("{}{suffix}", &base[..base.len().min(keep)]);
        n += 1;
    }
    candidate
}

fn char_width(column: &str, rows: &[&Row]) -> u8 {
    let widest = rows
        .iter()
        .filter_map(|row| row.get(column))
        .map(|value| json_value_to_cell(value).len())
        .max()
        .unwrap_or(0);
    u8::try_from(widest.clamp(1, MAX_CHAR_LEN)).unwrap_or(u8::MAX)
}

/// Field bytes, padded to the field length. Nulls are blank.
fn encode_value(field: &DbfField, value: &Value) -> Vec<u8> {
    let width = usize::from(field.length);
    let text = match (field.kind, value) {
        (_, Value::Null) => String::new(),
        (FieldKind::Logical, Value::Bool(b)) => if *b { "T" } else { "F" }.to_string(),
        (FieldKind::Logical, _) => "?".to_string(),
        (FieldKind::Date, v) => v
            .as_str()
            .and_then(|s| s.get(..10))
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(|d| d.format("%Y%m%d").to_string())
            .unwrap_or_default(),
        (FieldKind::Numeric, v) => numeric_text(field, v),
        (FieldKind::Character, v) => json_value_to_cell(v),
    };

    let mut bytes = match field.kind {
        FieldKind::Numeric => {
            let mut padded = vec![b' '; width.saturating_sub(text.len())];
            padded.extend_from_slice(text.as_bytes());
            padded
        }
        _ => truncate_utf8(&text, width).as_bytes().to_vec(),
    };
    bytes.resize(width, b' ');
    bytes
}

fn numeric_text(field: &DbfField, value: &Value) -> String {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(number) = number else {
        return String::new();
    };
    let text = if field.decimals == 0 {
        match value.as_i64() {
            Some(i) => i.to_string(),
            None => format!("{number:.0}"),
        }
    } else {
        format!("{number:.*}", usize::from(field.decimals))
    };
    if text.len() > usize::from(field.length) {
        String::new()
    } else {
        text
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
