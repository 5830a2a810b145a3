use crate::dedup::types::SourceId;
use serde::{Deserialize, Serialize};

/// A position inside one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub source_id: SourceId,
    pub offset: u64,
}

/// A byte range found identical in two or more sources.
///
/// `locations` is sorted by source id and always holds at least two entries:
/// the target the run was found in and the canonical copy it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRun {
    pub length: u64,
    pub locations: Vec<Location>,
}

impl MatchedRun {
    pub(crate) fn new(length: u64, mut locations: Vec<Location>) -> Self {
        locations.sort();
        Self { length, locations }
    }

    /// Where this run sits in `source`, if it occurs there.
    pub fn location_in(&self, source: SourceId) -> Option<Location> {
        self.locations.iter().copied().find(|l| l.source_id == source)
    }

    /// The copy a reader of `target` should be sent to: the lowest-id source
    /// other than `target` itself.
    pub fn canonical_for(&self, target: SourceId) -> Option<Location> {
        self.locations.iter().copied().find(|l| l.source_id != target)
    }
}

/// Matcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Worker threads (0 = one per available core)
    #[serde(default)]
    pub num_workers: usize,

    /// Runs shorter than this are left to the target's own bytes
    #[serde(default = "default_min_run_length")]
    pub min_run_length: u64,

    /// Verified candidates tried per chunk within the winning source
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_min_run_length() -> u64 {
    64
}

fn default_max_candidates() -> usize {
    8
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            num_workers: 0,
            min_run_length: default_min_run_length(),
            max_candidates: default_max_candidates(),
        }
    }
}

impl MatcherConfig {
    /// Number of worker threads to actually start.
    pub fn effective_workers(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
