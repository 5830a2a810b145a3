use std::path::PathBuf;
use thiserror::Error;

use crate::dedup::types::SourceId;

/// Errors produced by the dedup engine.
///
/// Integrity mismatches are not errors; they are reported as data by
/// [`crate::reader::Reader::verify_integrity`]. Reads past the logical end of
/// a file are not errors either; they return a short count.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed container structure at the given absolute byte offset.
    #[error("corrupt element at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: &'static str },

    /// Unrecoverable failure of a build invocation (matcher worker failure,
    /// index invariant violation). Never produces an output file.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The dedup file is structurally invalid and was rejected at open time.
    #[error("invalid dedup file: {0}")]
    InvalidIndex(String),

    /// A backing source could not be mapped; scoped to reads touching it.
    #[error("source {source_id} ({}) unavailable: {reason}", path.display())]
    SourceUnavailable {
        source_id: SourceId,
        path: PathBuf,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(offset: u64, reason: &'static str) -> Self {
        Error::Corrupt { offset, reason }
    }

    /// True for format errors raised by the element parser.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Corrupt { .. } | Error::InvalidIndex(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err)
            }
            other => std::io::Error::other(other),
        }
    }
}
