use crate::dedup::types::SourceId;
use crate::utils::Fingerprint;
use serde::Serialize;

/// An entry whose bytes no longer hash to the recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMismatch {
    pub entry: usize,
    pub source_id: SourceId,
    pub expected: Fingerprint,
    pub actual: Fingerprint,
}

/// An entry that could not be checked because its source is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub entry: usize,
    pub source_id: SourceId,
    pub reason: String,
}

/// Outcome of [`super::Reader::verify_integrity`].
///
/// Mismatches are data, not errors. Entries that could not be read are kept
/// apart so a missing disk is not mistaken for corruption.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    /// False when the file carries no entry fingerprints; nothing was checked.
    pub fingerprints_present: bool,
    pub entries_checked: usize,
    pub bytes_checked: u64,
    pub mismatches: Vec<EntryMismatch>,
    pub failures: Vec<EntryFailure>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.failures.is_empty()
    }
}
