//! Wire types for Tidemark.
//!
//! A [`Point`] is one measurement sample: measurement name, tag set, field
//! set and an optional timestamp. Points are encoded as InfluxDB line
//! protocol with nanosecond precision.
//!
//! The import engine treats points as opaque cargo: it batches and counts
//! them, but never looks inside. Everything that interprets file contents
//! lives behind the source format boundary in the `tidemark` crate.

mod point;

pub use point::{EncodeError, FieldValue, Point};
