//! Tidemark: incremental import of time-stamped files into InfluxDB.
//!
//! The engine is a synchronous, single-threaded pipeline per run:
//!
//! 1. [`scan`] lists a source directory and keeps files newer than the
//!    persisted watermark, sorted by modification time.
//! 2. [`extract`] defines the pluggable source-format boundary that turns
//!    one file into a lazy stream of points.
//! 3. [`pipeline`] groups the concatenated per-source stream into bounded
//!    batches and delivers them in order, stopping on the first failure.
//! 4. [`import`] orchestrates the above per source and advances the
//!    watermark only after every batch of that source was delivered.
//!
//! Delivery is at-least-once: a run that fails partway leaves the watermark
//! untouched, so the next run re-imports from the old cutoff. Duplicates are
//! acceptable, gaps are not.

pub mod config;
pub mod extract;
pub mod formats;
pub mod import;
pub mod influx;
pub mod pipeline;
pub mod scan;
