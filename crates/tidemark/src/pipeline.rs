//! Batched, in-order delivery of one source's record stream.
//!
//! The pipeline pulls points from the extraction stream, groups them into
//! bounded batches and hands each batch to the writer synchronously; batch
//! N+1 is not formed until batch N was accepted. Retrying transient remote
//! failures is the writer's job, not re-driven here: once the writer gives
//! up, the rest of the stream is abandoned and the error surfaces to the
//! orchestrator. Skipping a failed batch and carrying on would let the
//! watermark advance past a gap.

use crate::extract::ExtractError;
use crate::influx::WriteError;
use thiserror::Error;
use tidemark_protocol::Point;
use tracing::debug;

/// A delivery batch failed after the writer exhausted its retries.
#[derive(Debug, Error)]
#[error("delivery of batch {batch} for source '{source}' failed: {cause}")]
pub struct DeliveryError {
    pub source: String,
    /// 1-based index of the failed batch within this source's stream
    pub batch: usize,
    #[source]
    pub cause: WriteError,
}

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction failed for source '{source}': {cause}")]
    Extract {
        source: String,
        #[source]
        cause: ExtractError,
    },

    #[error(transparent)]
    Delivery(#[from] Box<DeliveryError>),
}

/// Sink for one connected remote session. Implementations own bounded
/// retry with backoff for transient failures.
pub trait BatchWriter {
    fn write_batch(&mut self, batch: &[Point]) -> Result<(), WriteError>;
}

/// Factory seam for the remote store connection, acquired once per source
/// run and released when the writer is dropped.
pub trait RemoteStore {
    type Writer: BatchWriter;

    fn connect(&self) -> Result<Self::Writer, WriteError>;
}

/// What a delivery run did, observable by callers (and the dry-run hook).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub records: usize,
    pub batches_formed: usize,
    pub batches_sent: usize,
}

/// Drain `records` into batches of at most `batch_size` points and deliver
/// them in stream order. `writer` is `None` in dry-run mode: batches are
/// formed and counted but never sent. An empty stream sends nothing.
pub fn deliver<W: BatchWriter>(
    source: &str,
    records: impl Iterator<Item = Result<Point, ExtractError>>,
    mut writer: Option<&mut W>,
    batch_size: usize,
) -> Result<DeliveryReport, PipelineError> {
    // A zero batch size would form empty batches forever.
    let batch_size = batch_size.max(1);
    let mut report = DeliveryReport::default();
    let mut batch: Vec<Point> = Vec::new();

    let flush = |batch: &mut Vec<Point>,
                     report: &mut DeliveryReport,
                     writer: &mut Option<&mut W>|
     -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }
        report.batches_formed += 1;
        if let Some(writer) = writer {
            writer.write_batch(batch).map_err(|cause| {
                Box::new(DeliveryError {
                    source: source.to_string(),
                    batch: report.batches_formed,
                    cause,
                })
            })?;
            report.batches_sent += 1;
        }
        debug!(
            source,
            batch = report.batches_formed,
            points = batch.len(),
            "batch done"
        );
        batch.clear();
        Ok(())
    };

    for record in records {
        let point = record.map_err(|cause| PipelineError::Extract {
            source: source.to_string(),
            cause,
        })?;
        batch.push(point);
        report.records += 1;
        if batch.len() == batch_size {
            flush(&mut batch, &mut report, &mut writer)?;
        }
    }
    flush(&mut batch, &mut report, &mut writer)?;

    Ok(report)
}
