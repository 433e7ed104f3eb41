//! Durable watermark table for Tidemark.
//!
//! One JSON file maps source names to the modification time of the newest
//! file already imported for that source. The table survives restarts and
//! is rewritten atomically, so a crash mid-update never corrupts prior
//! state.

mod store;

pub use store::{StoreError, WatermarkStore};

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;
