use crate::error::{Error, Result};
use crate::indexer::IndexerConfig;
use crate::matcher::MatcherConfig;
use crate::utils::Fingerprint;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable identifier of a source: its position in the build's source list.
pub type SourceId = u32;

/// One row of the dedup index: a logical range backed by a physical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub logical_offset: u64,
    pub length: u64,
    pub source_id: SourceId,
    pub source_offset: u64,
    /// Fingerprint of the entry's bytes, recorded at build time.
    pub fingerprint: Fingerprint,
}

impl Entry {
    /// Size of an entry in the on-disk table
    pub const SIZE: usize = 8 + 8 + 4 + 4 + 8 + 8; // 40 bytes

    #[inline]
    pub fn logical_end(&self) -> u64 {
        self.logical_offset + self.length
    }

    #[inline]
    pub fn source_end(&self) -> u64 {
        self.source_offset + self.length
    }

    #[inline]
    pub fn contains(&self, offset: u64) -> bool {
        self.logical_offset <= offset && offset < self.logical_end()
    }
}

/// A physical source as recorded in the dedup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: SourceId,
    /// As stored; relative paths resolve against the dedup file's directory.
    pub path: PathBuf,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

/// Immutable mapping from a logical file's byte space to source extents.
///
/// Invariants (checked by every constructor):
/// - entries are sorted, contiguous, and start at 0
/// - their lengths sum to `logical_size`
/// - every entry lies inside its source
#[derive(Debug, Clone)]
pub struct DedupIndex {
    logical_size: u64,
    entries: Vec<Entry>,
    sources: Vec<SourceInfo>,
}

impl DedupIndex {
    /// Validate and wrap a loaded index. Violations mean the file is invalid.
    pub fn new(logical_size: u64, entries: Vec<Entry>, sources: Vec<SourceInfo>) -> Result<Self> {
        validate(logical_size, &entries, &sources).map_err(Error::InvalidIndex)?;
        Ok(Self {
            logical_size,
            entries,
            sources,
        })
    }

    /// Wrap freshly built entries. Violations here are engine bugs.
    pub(crate) fn from_built(entries: Vec<Entry>, sources: Vec<SourceInfo>) -> Result<Self> {
        let logical_size = entries.last().map(|e| e.logical_end()).unwrap_or(0);
        validate(logical_size, &entries, &sources)
            .map_err(|reason| Error::Fatal(format!("index invariant violated: {reason}")))?;
        Ok(Self {
            logical_size,
            entries,
            sources,
        })
    }

    /// Replace the stored source paths, keeping ids and sizes.
    pub(crate) fn with_source_paths(mut self, paths: Vec<PathBuf>) -> Self {
        for (source, path) in self.sources.iter_mut().zip(paths) {
            source.path = path;
        }
        self
    }

    #[inline]
    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    #[inline]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[inline]
    pub fn entry(&self, i: usize) -> Option<&Entry> {
        self.entries.get(i)
    }

    pub fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceInfo> {
        self.sources.get(id as usize)
    }

    /// Index of the entry containing `offset`, trying `hint` and its
    /// successor before falling back to binary search.
    pub fn locate(&self, offset: u64, hint: Option<usize>) -> Option<usize> {
        if offset >= self.logical_size {
            return None;
        }
        if let Some(h) = hint {
            for i in [h, h.saturating_add(1)] {
                if self.entries.get(i).is_some_and(|e| e.contains(offset)) {
                    return Some(i);
                }
            }
        }
        Some(self.entries.partition_point(|e| e.logical_end() <= offset))
    }

    /// The minimal run of entries covering `[offset, offset + length)`,
    /// clamped to the logical end. Empty for zero-length or out-of-range
    /// requests.
    pub fn find_entries_for_range(&self, offset: u64, length: u64) -> &[Entry] {
        match self.locate(offset, None) {
            Some(first) if length > 0 => self.entries_from(first, offset.saturating_add(length)),
            _ => &[],
        }
    }

    /// Entries from index `first` up to the one covering `end - 1`.
    pub(crate) fn entries_from(&self, first: usize, end: u64) -> &[Entry] {
        let end = end.min(self.logical_size);
        let last = first + self.entries[first..].partition_point(|e| e.logical_offset < end);
        &self.entries[first..last]
    }

    /// Logical bytes served from each source, indexed by id.
    pub fn bytes_per_source(&self) -> Vec<u64> {
        let mut bytes = vec![0u64; self.sources.len()];
        for entry in &self.entries {
            bytes[entry.source_id as usize] += entry.length;
        }
        bytes
    }

    /// Bytes of the logical file stored in sources other than `source`.
    pub fn bytes_outside(&self, source: SourceId) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.source_id != source)
            .map(|e| e.length)
            .sum()
    }
}

fn validate(
    logical_size: u64,
    entries: &[Entry],
    sources: &[SourceInfo],
) -> std::result::Result<(), String> {
    for (i, source) in sources.iter().enumerate() {
        if source.id as usize != i {
            return Err(format!("source at position {i} has id {}", source.id));
        }
    }

    let mut expected_offset = 0u64;
    for (i, entry) in entries.iter().enumerate() {
        if entry.length == 0 {
            return Err(format!("entry {i} is empty"));
        }
        if entry.logical_offset != expected_offset {
            return Err(format!(
                "entry {i} starts at {} but the previous entry ends at {expected_offset}",
                entry.logical_offset
            ));
        }
        let source = sources
            .get(entry.source_id as usize)
            .ok_or_else(|| format!("entry {i} references unknown source {}", entry.source_id))?;
        let source_end = entry
            .source_offset
            .checked_add(entry.length)
            .ok_or_else(|| format!("entry {i} source range overflows"))?;
        if source_end > source.size {
            return Err(format!(
                "entry {i} reads [{}, {source_end}) past the end of source {} ({} bytes)",
                entry.source_offset, source.id, source.size
            ));
        }
        expected_offset = entry
            .logical_offset
            .checked_add(entry.length)
            .ok_or_else(|| format!("entry {i} logical range overflows"))?;
    }

    if expected_offset != logical_size {
        return Err(format!(
            "entries cover {expected_offset} bytes but the logical size is {logical_size}"
        ));
    }
    Ok(())
}

/// Configuration for building a dedup file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Position of the file to reconstruct in the source list. `None` means
    /// the last source.
    #[serde(default)]
    pub primary: Option<usize>,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    /// Store source paths relative to the output directory where possible.
    #[serde(default)]
    pub relative_paths: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            primary: None,
            indexer: IndexerConfig::default(),
            matcher: MatcherConfig::default(),
            relative_paths: false,
        }
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub output: PathBuf,
    pub primary: SourceId,
    pub logical_size: u64,
    pub entry_count: usize,
    pub source_count: usize,
    /// Logical bytes served from sources other than the primary.
    pub deduplicated_bytes: u64,
    /// Logical bytes served from each source, indexed by id.
    pub source_bytes: Vec<u64>,
}
