//! The dedup index: entry model, file format and build pipeline.
//!
//! A dedup file describes one logical file as a sorted, gap-free list of
//! entries, each pointing at a byte range of some source. Building one runs
//! the indexer over every source, matches the primary against the others and
//! writes the result atomically.

pub mod build;
pub mod format;
pub mod stats;
pub mod types;

pub use build::{build_dedup_file, DedupBuilder};
pub use stats::{Info, SourceStatus, SourceSummary};
pub use types::*;
