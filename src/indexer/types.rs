use crate::dedup::types::SourceId;
use crate::error::Error;
use crate::utils::Fingerprint;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;

/// A fingerprinted frame payload inside one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub offset: u64,
    pub length: u64,
    pub fingerprint: Fingerprint,
}

impl Chunk {
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn range(&self) -> Range<u64> {
        self.offset..self.end()
    }
}

/// Chunks of one source plus the ranges a resynchronising parse skipped.
#[derive(Debug, Clone, Default)]
pub struct ChunkList {
    pub chunks: Vec<Chunk>,
    /// Byte ranges abandoned after corruption (resync policy only). Always
    /// empty for an index usable for dedup construction.
    pub skipped: Vec<Range<u64>>,
}

impl ChunkList {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Total payload bytes covered by chunks.
    pub fn indexed_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.length).sum()
    }
}

/// Indexing stopped at a corrupt element; carries what was found before it.
#[derive(Debug, thiserror::Error)]
#[error("indexing stopped after {} chunks: {error}", chunks.len())]
pub struct PartialIndex {
    pub chunks: Vec<Chunk>,
    #[source]
    pub error: Error,
}

impl From<PartialIndex> for Error {
    fn from(partial: PartialIndex) -> Self {
        partial.error
    }
}

/// A physical file after indexing. Immutable once built.
#[derive(Debug, Clone)]
pub struct IndexedSource {
    pub id: SourceId,
    pub path: PathBuf,
    pub size: u64,
    pub chunks: Vec<Chunk>,
}

/// What to do when the parser hits a corrupt element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsePolicy {
    /// Stop and report the partial index. Required for dedup construction.
    #[default]
    Abort,
    /// Skip forward to the next cluster and keep going. Diagnostics only.
    Resync,
}

/// Configuration for the indexer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub policy: ParsePolicy,
}
