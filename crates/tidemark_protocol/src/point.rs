//! Point type and line protocol encoding.
//!
//! Line protocol reference:
//! `measurement[,tag=value...] field=value[,field=value...] [timestamp]`
//!
//! Escaping rules differ per position:
//! - measurement: escape `,` and space
//! - tag keys, tag values, field keys: escape `,`, `=` and space
//! - string field values: escape `"` and `\`, wrapped in double quotes

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while encoding a point to line protocol.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("point '{measurement}' has no fields")]
    NoFields { measurement: String },

    #[error("timestamp on point '{measurement}' is outside the nanosecond-representable range")]
    TimestampRange { measurement: String },
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// One wire-ready sample.
///
/// Tags and fields are kept in `BTreeMap`s so encoded output is
/// deterministic (sorted keys), which also matches the server's preferred
/// lexicographic tag order.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Option<DateTime<Utc>>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Encode this point as one line of line protocol (no trailing newline).
    pub fn encode(&self, out: &mut String) -> Result<(), EncodeError> {
        if self.fields.is_empty() {
            return Err(EncodeError::NoFields {
                measurement: self.measurement.clone(),
            });
        }

        escape_measurement(&self.measurement, out);
        for (key, value) in &self.tags {
            out.push(',');
            escape_key(key, out);
            out.push('=');
            escape_key(value, out);
        }

        out.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                out.push(',');
            }
            first = false;
            escape_key(key, out);
            out.push('=');
            encode_field_value(value, out);
        }

        if let Some(ts) = self.timestamp {
            let nanos = ts
                .timestamp_nanos_opt()
                .ok_or_else(|| EncodeError::TimestampRange {
                    measurement: self.measurement.clone(),
                })?;
            out.push(' ');
            out.push_str(&nanos.to_string());
        }

        Ok(())
    }

    /// Encode a batch of points as a newline-separated line protocol body.
    pub fn encode_batch(points: &[Point]) -> Result<String, EncodeError> {
        let mut body = String::new();
        for point in points {
            if !body.is_empty() {
                body.push('\n');
            }
            point.encode(&mut body)?;
        }
        Ok(body)
    }
}

fn escape_measurement(raw: &str, out: &mut String) {
    for c in raw.chars() {
        if c == ',' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn escape_key(raw: &str, out: &mut String) {
    for c in raw.chars() {
        if c == ',' || c == '=' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
}

fn encode_field_value(value: &FieldValue, out: &mut String) {
    match value {
        FieldValue::Float(v) => out.push_str(&format!("{v}")),
        FieldValue::Integer(v) => {
            out.push_str(&v.to_string());
            out.push('i');
        }
        FieldValue::Boolean(v) => out.push_str(if *v { "true" } else { "false" }),
        FieldValue::Text(v) => {
            out.push('"');
            for c in v.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode(point: &Point) -> String {
        let mut out = String::new();
        point.encode(&mut out).unwrap();
        out
    }

    #[test]
    fn basic_point() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let point = Point::new("office_env")
            .tag("room", "a1")
            .field("temperature", 21.5)
            .timestamp(ts);
        assert_eq!(
            encode(&point),
            format!(
                "office_env,room=a1 temperature=21.5 {}",
                ts.timestamp_nanos_opt().unwrap()
            )
        );
    }

    #[test]
    fn tags_and_fields_are_sorted() {
        let point = Point::new("m")
            .tag("zone", "z")
            .tag("area", "a")
            .field("b", 2i64)
            .field("a", 1i64);
        assert_eq!(encode(&point), "m,area=a,zone=z a=1i,b=2i");
    }

    #[test]
    fn escaping() {
        let point = Point::new("my measurement")
            .tag("tag key", "va,lue")
            .field("f=k", FieldValue::Text("say \"hi\" \\ bye".into()));
        assert_eq!(
            encode(&point),
            "my\\ measurement,tag\\ key=va\\,lue f\\=k=\"say \\\"hi\\\" \\\\ bye\""
        );
    }

    #[test]
    fn value_kinds() {
        let point = Point::new("m")
            .field("f", 1.25)
            .field("i", -3i64)
            .field("b", true)
            .field("s", "text");
        assert_eq!(encode(&point), "m b=true,f=1.25,i=-3i,s=\"text\"");
    }

    #[test]
    fn no_fields_is_an_error() {
        let point = Point::new("m").tag("t", "v");
        let mut out = String::new();
        assert!(matches!(
            point.encode(&mut out),
            Err(EncodeError::NoFields { .. })
        ));
    }

    #[test]
    fn untimestamped_point_has_no_trailing_column() {
        let point = Point::new("m").field("f", 1i64);
        assert_eq!(encode(&point), "m f=1i");
    }

    #[test]
    fn batch_encoding_joins_with_newlines() {
        let points = vec![
            Point::new("m").field("f", 1i64),
            Point::new("m").field("f", 2i64),
        ];
        assert_eq!(Point::encode_batch(&points).unwrap(), "m f=1i\nm f=2i");
    }
}
