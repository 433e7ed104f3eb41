//! JSON-backed watermark table with atomic replace.

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Watermark store error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read watermark table {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write watermark table {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("watermark table {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One persisted entry. Kept as a struct so the on-disk format can grow
/// more bookkeeping per source without a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    last_mtime: DateTime<FixedOffset>,
}

type Table = BTreeMap<String, Entry>;

/// Per-source watermark table persisted as a single JSON file.
///
/// Timestamps are compared as instants; serialization uses the process-local
/// UTC offset captured when the store is opened, not the offset the source
/// files were written under.
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    zone: FixedOffset,
}

impl WatermarkStore {
    /// Bind to a table file, creating an empty table if none exists.
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let store = Self {
            zone: Local::now().offset().fix(),
            path,
        };
        if !store.path.is_file() {
            debug!("creating empty watermark table at {}", store.path.display());
            store.write_table(&Table::new())?;
        }
        Ok(store)
    }

    /// Path of the underlying table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Watermark for one source; the Unix epoch if none was persisted yet.
    pub fn get(&self, source: &str) -> crate::Result<DateTime<FixedOffset>> {
        let table = self.read_table()?;
        Ok(table
            .get(source)
            .map(|entry| entry.last_mtime)
            .unwrap_or_else(|| self.epoch()))
    }

    /// Persist a new watermark for one source, leaving all other entries
    /// untouched. Durable (atomic replace) before this returns.
    pub fn set(&self, source: &str, mtime: DateTime<Utc>) -> crate::Result<()> {
        let mut table = self.read_table()?;
        table.insert(
            source.to_string(),
            Entry {
                last_mtime: mtime.with_timezone(&self.zone),
            },
        );
        self.write_table(&table)?;
        debug!(source, %mtime, "watermark advanced");
        Ok(())
    }

    /// All persisted watermarks, keyed by source name.
    pub fn all(&self) -> crate::Result<BTreeMap<String, DateTime<FixedOffset>>> {
        let table = self.read_table()?;
        Ok(table
            .into_iter()
            .map(|(name, entry)| (name, entry.last_mtime))
            .collect())
    }

    fn epoch(&self) -> DateTime<FixedOffset> {
        DateTime::<Utc>::UNIX_EPOCH.with_timezone(&self.zone)
    }

    fn read_table(&self) -> crate::Result<Table> {
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomic write via temp file + rename, same directory as the table.
    fn write_table(&self, table: &Table) -> crate::Result<()> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let content = serde_json::to_string_pretty(table).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "watermarks".to_string());
        let temp_path = self.path.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&temp_path, content).map_err(write_err)?;
        fs::rename(&temp_path, &self.path).map_err(write_err)?;
        Ok(())
    }
}
