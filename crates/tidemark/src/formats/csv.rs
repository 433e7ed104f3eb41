//! CSV source format.
//!
//! The metadata description is a JSON document mapping CSV columns onto the
//! point shape:
//!
//! ```json
//! {
//!   "measurement": "office_env",
//!   "timestamp": { "column": "time" },
//!   "tags": { "site": "hq" },
//!   "tag_columns": ["room"],
//!   "fields": { "temperature": "float", "occupied": "boolean" }
//! }
//! ```
//!
//! `timestamp.format` is an optional strftime string; without it the column
//! must hold RFC 3339. Field keys name CSV columns; the value picks the
//! wire type. Empty cells are gaps, not errors: the field is dropped, and a
//! row with no remaining fields is skipped.

use crate::extract::{ExtractError, Metadata, RecordIter, SourceFormat};
use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tidemark_protocol::{FieldValue, Point};

/// Source format for delimiter-separated files with a header row.
pub struct CsvFormat;

#[derive(Debug, Clone, Deserialize)]
struct CsvSpec {
    measurement: String,
    timestamp: TimestampSpec,
    /// Static tags applied to every point
    #[serde(default)]
    tags: BTreeMap<String, String>,
    /// Columns promoted to tags, keyed by column name
    #[serde(default)]
    tag_columns: Vec<String>,
    /// Column name -> wire type
    fields: BTreeMap<String, FieldKind>,
    #[serde(default)]
    delimiter: Option<char>,
}

#[derive(Debug, Clone, Deserialize)]
struct TimestampSpec {
    column: String,
    /// strftime format; None = RFC 3339
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FieldKind {
    Float,
    Integer,
    Boolean,
    Text,
}

impl SourceFormat for CsvFormat {
    fn load_metadata(&self, path: &Path, source: &str) -> Result<Metadata, ExtractError> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "cannot read metadata description {} for source '{source}'",
                path.display()
            )
        })?;
        let value: serde_json::Value = serde_json::from_str(&content).with_context(|| {
            format!(
                "metadata description {} is not valid JSON",
                path.display()
            )
        })?;
        // Validate the shape up front so a broken description fails the
        // source before any file is opened.
        let _: CsvSpec = serde_json::from_value(value.clone()).with_context(|| {
            format!(
                "metadata description {} does not describe a csv source",
                path.display()
            )
        })?;
        Ok(Metadata::new(value))
    }

    fn parse_file<'a>(
        &'a self,
        path: &Path,
        source: &str,
        metadata: &'a Metadata,
    ) -> Result<RecordIter<'a>, ExtractError> {
        let spec: CsvSpec = serde_json::from_value(metadata.as_value().clone())
            .with_context(|| format!("invalid csv metadata for source '{source}'"))?;

        let mut builder = csv::ReaderBuilder::new();
        if let Some(delimiter) = spec.delimiter {
            if !delimiter.is_ascii() {
                return Err(ExtractError::message(format!(
                    "csv delimiter {delimiter:?} for source '{source}' is not ASCII"
                )));
            }
            builder.delimiter(delimiter as u8);
        }
        let mut reader = builder
            .from_path(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("cannot read header row of {}", path.display()))?
            .clone();

        let plan = RowPlan::resolve(spec, &headers, path)?;
        let iter = reader
            .into_records()
            .enumerate()
            .map(move |(index, record)| {
                // Header is line 1; data starts at line 2.
                let line = index + 2;
                let record = record.map_err(|err| {
                    ExtractError::message(format!(
                        "{} line {line}: {err}",
                        plan.path.display()
                    ))
                })?;
                plan.point(&record, line)
            })
            .filter_map(|result| result.transpose());
        Ok(Box::new(iter))
    }
}

/// Column indices resolved against one file's header row.
struct RowPlan {
    path: PathBuf,
    measurement: String,
    timestamp_index: usize,
    timestamp_format: Option<String>,
    static_tags: BTreeMap<String, String>,
    tag_columns: Vec<(String, usize)>,
    field_columns: Vec<(String, usize, FieldKind)>,
}

impl RowPlan {
    fn resolve(spec: CsvSpec, headers: &csv::StringRecord, path: &Path) -> Result<Self, ExtractError> {
        let index_of = |column: &str| -> Result<usize, ExtractError> {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| {
                    ExtractError::message(format!(
                        "{}: column '{column}' not found in header",
                        path.display()
                    ))
                })
        };

        let timestamp_index = index_of(&spec.timestamp.column)?;
        let tag_columns = spec
            .tag_columns
            .iter()
            .map(|column| Ok((column.clone(), index_of(column)?)))
            .collect::<Result<Vec<_>, ExtractError>>()?;
        let field_columns = spec
            .fields
            .iter()
            .map(|(column, kind)| Ok((column.clone(), index_of(column)?, *kind)))
            .collect::<Result<Vec<_>, ExtractError>>()?;

        Ok(Self {
            path: path.to_path_buf(),
            measurement: spec.measurement,
            timestamp_index,
            timestamp_format: spec.timestamp.format,
            static_tags: spec.tags,
            tag_columns,
            field_columns,
        })
    }

    /// Build one point from a data row; `None` if every field cell is empty.
    fn point(&self, record: &csv::StringRecord, line: usize) -> Result<Option<Point>, ExtractError> {
        let cell = |index: usize| record.get(index).unwrap_or("");

        let raw_ts = cell(self.timestamp_index);
        let timestamp = parse_timestamp(raw_ts, self.timestamp_format.as_deref())
            .map_err(|err| {
                ExtractError::message(format!(
                    "{} line {line}: bad timestamp '{raw_ts}': {err}",
                    self.path.display()
                ))
            })?;

        let mut point = Point::new(&self.measurement).timestamp(timestamp);
        for (key, value) in &self.static_tags {
            point = point.tag(key, value);
        }
        for (key, index) in &self.tag_columns {
            let value = cell(*index);
            if !value.is_empty() {
                point = point.tag(key, value);
            }
        }

        for (key, index, kind) in &self.field_columns {
            let raw = cell(*index);
            if raw.is_empty() {
                continue;
            }
            let value = parse_field(raw, *kind).map_err(|err| {
                ExtractError::message(format!(
                    "{} line {line}: field '{key}': {err}",
                    self.path.display()
                ))
            })?;
            point = point.field(key, value);
        }

        if point.has_fields() {
            Ok(Some(point))
        } else {
            Ok(None)
        }
    }
}

fn parse_timestamp(raw: &str, format: Option<&str>) -> Result<DateTime<Utc>, String> {
    match format {
        None => DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|err| err.to_string()),
        Some(fmt) => {
            // Offset-aware first; naive timestamps are taken as UTC.
            if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
                return Ok(ts.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(raw, fmt)
                .map(|naive| naive.and_utc())
                .map_err(|err| err.to_string())
        }
    }
}

fn parse_field(raw: &str, kind: FieldKind) -> Result<FieldValue, String> {
    match kind {
        FieldKind::Float => raw
            .parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|err| err.to_string()),
        FieldKind::Integer => raw
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|err| err.to_string()),
        FieldKind::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(FieldValue::Boolean(true)),
            "false" | "0" => Ok(FieldValue::Boolean(false)),
            other => Err(format!("'{other}' is not a boolean")),
        },
        FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn office_metadata(dir: &Path) -> Metadata {
        let path = write(
            dir,
            "office.json",
            r#"{
                "measurement": "office_env",
                "timestamp": { "column": "time" },
                "tags": { "site": "hq" },
                "tag_columns": ["room"],
                "fields": { "temperature": "float", "occupied": "boolean" }
            }"#,
        );
        CsvFormat.load_metadata(&path, "office").unwrap()
    }

    fn collect(path: &Path, metadata: &Metadata) -> Vec<Point> {
        CsvFormat
            .parse_file(path, "office", metadata)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn parses_rows_into_points() {
        let temp = TempDir::new().unwrap();
        let metadata = office_metadata(temp.path());
        let file = write(
            temp.path(),
            "data.csv",
            "time,room,temperature,occupied\n\
             2024-01-01T00:00:00Z,a1,21.5,true\n\
             2024-01-01T00:10:00Z,a2,19.0,false\n",
        );

        let points = collect(&file, &metadata);
        assert_eq!(points.len(), 2);

        let mut line = String::new();
        points[0].encode(&mut line).unwrap();
        assert!(line.starts_with("office_env,room=a1,site=hq "));
        assert!(line.contains("occupied=true"));
        assert!(line.contains("temperature=21.5"));
    }

    #[test]
    fn empty_cells_are_gaps() {
        let temp = TempDir::new().unwrap();
        let metadata = office_metadata(temp.path());
        let file = write(
            temp.path(),
            "data.csv",
            "time,room,temperature,occupied\n\
             2024-01-01T00:00:00Z,a1,,true\n\
             2024-01-01T00:10:00Z,a1,,\n",
        );

        let points = collect(&file, &metadata);
        // Second row has no fields at all and is skipped.
        assert_eq!(points.len(), 1);
        let mut line = String::new();
        points[0].encode(&mut line).unwrap();
        assert!(!line.contains("temperature"));
    }

    #[test]
    fn strftime_timestamps() {
        let temp = TempDir::new().unwrap();
        let path = write(
            temp.path(),
            "meta.json",
            r#"{
                "measurement": "m",
                "timestamp": { "column": "ts", "format": "%Y-%m-%d %H:%M:%S" },
                "fields": { "v": "integer" }
            }"#,
        );
        let metadata = CsvFormat.load_metadata(&path, "s").unwrap();
        let file = write(temp.path(), "data.csv", "ts,v\n2024-06-01 12:00:00,7\n");

        let points = collect(&file, &metadata);
        assert_eq!(points.len(), 1);
        let mut line = String::new();
        points[0].encode(&mut line).unwrap();
        assert!(line.starts_with("m v=7i "));
    }

    #[test]
    fn missing_column_is_an_error() {
        let temp = TempDir::new().unwrap();
        let metadata = office_metadata(temp.path());
        let file = write(temp.path(), "data.csv", "time,room\n2024-01-01T00:00:00Z,a1\n");

        let result: Result<Vec<_>, _> = match CsvFormat.parse_file(&file, "office", &metadata) {
            Ok(iter) => iter.collect(),
            Err(err) => Err(err),
        };
        // Fields resolve in key order, so 'occupied' is reported first.
        let err = result.unwrap_err().to_string();
        assert!(err.contains("occupied"), "unexpected error: {err}");
    }

    #[test]
    fn bad_value_names_the_line() {
        let temp = TempDir::new().unwrap();
        let metadata = office_metadata(temp.path());
        let file = write(
            temp.path(),
            "data.csv",
            "time,room,temperature,occupied\n\
             2024-01-01T00:00:00Z,a1,warm,true\n",
        );

        let result: Result<Vec<_>, _> = CsvFormat
            .parse_file(&file, "office", &metadata)
            .unwrap()
            .collect();
        let err = result.unwrap_err().to_string();
        assert!(err.contains("line 2"), "unexpected error: {err}");
    }

    #[test]
    fn rejects_non_csv_description() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "meta.json", r#"{ "measurement": "m" }"#);
        assert!(CsvFormat.load_metadata(&path, "s").is_err());
    }
}
