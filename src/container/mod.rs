//! EBML element parsing.
//!
//! Matroska files are trees of `(id, size, content)` elements whose IDs and
//! sizes are variable-length integers. This module decodes that layout
//! lazily:
//!
//! - [`vint`] - variable-length integer decoding and encoding
//! - [`parser`] - [`ElementIter`], a lazy sibling iterator with absolute offsets
//! - [`ids`] - element IDs used by the indexer
//! - [`writer`] - a minimal EBML writer for synthesising fixtures

pub mod ids;
pub mod parser;
pub mod vint;
pub mod writer;

pub use parser::{Element, ElementIter};
pub use vint::ElementSize;
