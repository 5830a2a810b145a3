//! # mkvdedup - Cross-file deduplication for Matroska media
//!
//! Libraries of related Matroska files (re-encodes, remuxes, different audio
//! tracks over the same video) share most of their frame data. mkvdedup finds
//! those shared byte runs and stores a file as a small dedup index whose
//! entries point at ranges of other files, then serves random-access reads of
//! the original bytes straight from memory maps.
//!
//! ## Architecture
//!
//! - [`container`] - EBML variable-length integers and a lazy element parser
//! - [`indexer`] - turns a source into fingerprinted frame-payload chunks
//! - [`matcher`] - finds identical byte runs across sources on a worker pool
//! - [`dedup`] - the entry model, the on-disk format and the build pipeline
//! - [`reader`] - reconstructs the logical file with `read_at`
//! - [`mmap`] - shared, reference-counted source mappings
//! - [`utils`] - fingerprints, little-endian helpers, progress bars
//!
//! ## Quick Start
//!
//! ```ignore
//! use mkvdedup::dedup::{build_dedup_file, BuildConfig};
//! use mkvdedup::reader::Reader;
//! use std::path::{Path, PathBuf};
//!
//! // The last source is the file being deduplicated
//! let sources = vec![PathBuf::from("original.mkv"), PathBuf::from("remux.mkv")];
//! build_dedup_file(&sources, Path::new("remux.dedup"), &BuildConfig::default())?;
//!
//! let reader = Reader::open(Path::new("remux.dedup"))?;
//! let mut buf = vec![0u8; 4096];
//! let n = reader.read_at(&mut buf, 0)?;
//! ```

pub mod container;
pub mod dedup;
pub mod error;
pub mod indexer;
pub mod matcher;
pub mod mmap;
pub mod reader;
pub mod utils;

pub use dedup::{build_dedup_file, BuildConfig, BuildSummary, DedupIndex, Entry, SourceId};
pub use error::{Error, Result};
pub use reader::{Reader, ReaderOptions};
