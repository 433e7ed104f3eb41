//! The source-format boundary: metadata binding and record extraction.
//!
//! A source format turns one file into a lazy, finite stream of points. The
//! engine never interprets file bytes or metadata itself; it resolves a
//! format by the source-type identifier from config and drives the two
//! methods below.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tidemark_protocol::Point;

/// Errors raised while loading metadata or extracting records.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ExtractError {
    pub fn message(message: impl Into<String>) -> Self {
        ExtractError::Message {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ExtractError {
    fn from(err: anyhow::Error) -> Self {
        ExtractError::Source {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Opaque per-source metadata, resolved once per source per run.
///
/// Formats interpret the inner value; the engine only carries it.
#[derive(Debug, Clone)]
pub struct Metadata(serde_json::Value);

impl Metadata {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Lazy record stream for one file. Finite, produced fresh each run.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Point, ExtractError>> + 'a>;

/// One implementation per source type, selected by the identifier in config.
pub trait SourceFormat {
    /// Load the metadata description for a source. Called at most once per
    /// source per run, and only when the scan found candidate files.
    fn load_metadata(&self, path: &Path, source: &str) -> Result<Metadata, ExtractError>;

    /// Extract wire-ready points from one file. Invoked once per candidate,
    /// in ascending modification-time order.
    fn parse_file<'a>(
        &'a self,
        path: &Path,
        source: &str,
        metadata: &'a Metadata,
    ) -> Result<RecordIter<'a>, ExtractError>;
}

/// Registry mapping source-type identifiers to format implementations.
#[derive(Default)]
pub struct FormatRegistry {
    formats: HashMap<String, Box<dyn SourceFormat>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the formats shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("csv", Box::new(crate::formats::csv::CsvFormat));
        registry
    }

    pub fn register(&mut self, id: impl Into<String>, format: Box<dyn SourceFormat>) {
        self.formats.insert(id.into(), format);
    }

    pub fn get(&self, id: &str) -> Option<&dyn SourceFormat> {
        self.formats.get(id).map(|f| f.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFormat;

    impl SourceFormat for NullFormat {
        fn load_metadata(&self, _path: &Path, _source: &str) -> Result<Metadata, ExtractError> {
            Ok(Metadata::new(serde_json::Value::Null))
        }

        fn parse_file<'a>(
            &'a self,
            _path: &Path,
            _source: &str,
            _metadata: &'a Metadata,
        ) -> Result<RecordIter<'a>, ExtractError> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    #[test]
    fn registry_resolves_by_identifier() {
        let mut registry = FormatRegistry::new();
        registry.register("null", Box::new(NullFormat));
        assert!(registry.get("null").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn builtin_registry_knows_csv() {
        let registry = FormatRegistry::builtin();
        assert!(registry.get("csv").is_some());
    }
}
