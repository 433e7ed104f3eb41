//! Configuration for a Tidemark run.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub import: ImportConfig,

    /// Sources in declared order; the run processes them in this order.
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

/// Connection parameters for the InfluxDB instance written to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base URL, e.g. `http://localhost:8086`
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Settings shared by all sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory the per-source subdirectories live under
    pub data_base_dir: PathBuf,

    /// Path of the persisted watermark table
    pub status_file: PathBuf,

    /// Maximum number of points per delivered batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// One named logical feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name, also the watermark table key
    pub name: String,

    /// Subdirectory under `data_base_dir` holding this source's files
    pub subdir: PathBuf,

    /// Regex matched against the whole file name; absent = match all
    #[serde(default)]
    pub pattern: Option<String>,

    /// Source-format identifier, resolved against the format registry
    pub format: String,

    /// Path of the metadata description file for this source
    pub metadata: PathBuf,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    5_000
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [database]
        url = "http://localhost:8086"
        token = "secret"
        org = "acme"
        bucket = "telemetry"

        [import]
        data_base_dir = "/srv/feeds"
        status_file = "/var/lib/tidemark/watermarks.json"

        [[source]]
        name = "office"
        subdir = "office"
        pattern = 'office_\d+\.csv'
        format = "csv"
        metadata = "/etc/tidemark/office.json"

        [[source]]
        name = "plant"
        subdir = "plant"
        format = "csv"
        metadata = "/etc/tidemark/plant.json"
    "#;

    #[test]
    fn parses_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.database.bucket, "telemetry");
        assert_eq!(config.database.timeout_secs, 30);
        assert_eq!(config.import.batch_size, 5_000);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].name, "office");
        assert!(config.sources[1].pattern.is_none());
    }

    #[test]
    fn declared_source_order_is_preserved() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let names: Vec<_> = config.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["office", "plant"]);
    }

    #[test]
    fn round_trips_through_toml() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.sources.len(), config.sources.len());
        assert_eq!(parsed.import.status_file, config.import.status_file);
    }
}
