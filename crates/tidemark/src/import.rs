//! Per-source import orchestration.
//!
//! Sources run strictly in declared order. For each source: scan, skip if
//! nothing is new, bind metadata, connect, extract + deliver, and persist
//! the watermark only after every batch landed. A metadata failure abandons
//! just that source; a delivery, extraction or store failure aborts the
//! whole run so a gap can never hide behind an advanced watermark.

use crate::config::{Config, SourceConfig};
use crate::extract::{ExtractError, FormatRegistry, Metadata, RecordIter, SourceFormat};
use crate::influx::WriteError;
use crate::pipeline::{self, DeliveryReport, PipelineError, RemoteStore};
use crate::scan::{self, compile_name_pattern, Candidate};
use chrono::Utc;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tidemark_protocol::Point;
use tidemark_store::{StoreError, WatermarkStore};
use tracing::{debug, error, info};

/// Fatal run error type
#[derive(Debug, Error)]
pub enum RunError {
    #[error("source '{source_name}': unknown format '{format}'")]
    UnknownFormat { source_name: String, format: String },

    #[error("source '{source}': invalid file name pattern '{pattern}': {cause}")]
    Pattern {
        source: String,
        pattern: String,
        #[source]
        cause: regex::Error,
    },

    #[error("source '{source}': cannot scan {}: {cause}", dir.display())]
    Scan {
        source: String,
        dir: PathBuf,
        #[source]
        cause: io::Error,
    },

    #[error("source '{source}': cannot connect to remote store: {cause}")]
    Connect {
        source: String,
        #[source]
        cause: WriteError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// What happened to one source during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// No candidate files: nothing was bound, sent or persisted.
    Skipped,
    Imported {
        files: usize,
        report: DeliveryReport,
    },
    DryRun {
        files: usize,
        report: DeliveryReport,
    },
    /// Metadata binding failed; later sources still ran.
    MetadataFailed { error: String },
}

/// Per-source outcomes of one run, in processing order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<(String, SourceOutcome)>,
}

impl RunReport {
    pub fn fully_succeeded(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|(_, outcome)| matches!(outcome, SourceOutcome::MetadataFailed { .. }))
    }

    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, outcome)| outcome)
    }
}

/// Drives one import run over all configured sources.
pub struct Importer<'a, R: RemoteStore> {
    config: &'a Config,
    registry: &'a FormatRegistry,
    store: &'a WatermarkStore,
    remote: &'a R,
}

impl<'a, R: RemoteStore> Importer<'a, R> {
    pub fn new(
        config: &'a Config,
        registry: &'a FormatRegistry,
        store: &'a WatermarkStore,
        remote: &'a R,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            remote,
        }
    }

    /// Run the import over all sources in declared order. The first fatal
    /// error aborts the run; remaining sources are not attempted.
    pub fn run(&self, dry_run: bool) -> Result<RunReport, RunError> {
        // Resolve every format up front so a config typo fails before any
        // source moves data.
        for source in &self.config.sources {
            if self.registry.get(&source.format).is_none() {
                return Err(RunError::UnknownFormat {
                    source_name: source.name.clone(),
                    format: source.format.clone(),
                });
            }
        }

        let mut run_report = RunReport::default();
        for source in &self.config.sources {
            let outcome = self.run_source(source, dry_run)?;
            match &outcome {
                SourceOutcome::Skipped => debug!(source = %source.name, "no new files"),
                SourceOutcome::Imported { files, report } => info!(
                    source = %source.name,
                    files,
                    records = report.records,
                    batches = report.batches_sent,
                    "imported"
                ),
                SourceOutcome::DryRun { files, report } => info!(
                    source = %source.name,
                    files,
                    records = report.records,
                    batches = report.batches_formed,
                    "dry run, nothing sent"
                ),
                SourceOutcome::MetadataFailed { .. } => {}
            }
            run_report.outcomes.push((source.name.clone(), outcome));
        }
        Ok(run_report)
    }

    fn run_source(&self, source: &SourceConfig, dry_run: bool) -> Result<SourceOutcome, RunError> {
        let format = self
            .registry
            .get(&source.format)
            .ok_or_else(|| RunError::UnknownFormat {
                source_name: source.name.clone(),
                format: source.format.clone(),
            })?;
        let pattern = source
            .pattern
            .as_deref()
            .map(compile_name_pattern)
            .transpose()
            .map_err(|cause| RunError::Pattern {
                source: source.name.clone(),
                pattern: source.pattern.clone().unwrap_or_default(),
                cause,
            })?;

        let watermark = self.store.get(&source.name)?.with_timezone(&Utc);
        let dir = self.config.import.data_base_dir.join(&source.subdir);
        let candidates =
            scan::scan_dir(&dir, pattern.as_ref(), watermark).map_err(|cause| RunError::Scan {
                source: source.name.clone(),
                dir: dir.clone(),
                cause,
            })?;
        if candidates.is_empty() {
            return Ok(SourceOutcome::Skipped);
        }
        let newest = candidates
            .iter()
            .map(|candidate| candidate.mtime)
            .max()
            .unwrap_or(watermark);

        let metadata = match format.load_metadata(&source.metadata, &source.name) {
            Ok(metadata) => metadata,
            Err(err) => {
                error!(
                    source = %source.name,
                    error = %err,
                    "metadata binding failed, abandoning this source"
                );
                return Ok(SourceOutcome::MetadataFailed {
                    error: err.to_string(),
                });
            }
        };

        let files = candidates.len();
        let records = record_stream(format, &source.name, &metadata, candidates);
        let batch_size = self.config.import.batch_size;

        if dry_run {
            let report = pipeline::deliver::<R::Writer>(&source.name, records, None, batch_size)?;
            return Ok(SourceOutcome::DryRun { files, report });
        }

        let report = {
            let mut writer = self.remote.connect().map_err(|cause| RunError::Connect {
                source: source.name.clone(),
                cause,
            })?;
            // The writer is dropped at the end of this block on every path,
            // including the error return out of deliver.
            pipeline::deliver(&source.name, records, Some(&mut writer), batch_size)?
        };

        self.store.set(&source.name, newest)?;
        Ok(SourceOutcome::Imported { files, report })
    }
}

/// Concatenate per-file record streams in candidate order. Lazy: file N+1
/// is not opened until file N is fully drained by the pipeline.
fn record_stream<'a>(
    format: &'a dyn SourceFormat,
    source: &'a str,
    metadata: &'a Metadata,
    candidates: Vec<Candidate>,
) -> impl Iterator<Item = Result<Point, ExtractError>> + 'a {
    candidates.into_iter().flat_map(move |candidate| {
        match format.parse_file(&candidate.path, source, metadata) {
            Ok(iter) => iter,
            Err(err) => Box::new(std::iter::once(Err(err))) as RecordIter<'a>,
        }
    })
}
