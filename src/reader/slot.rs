use crate::dedup::stats::SourceStatus;
use crate::dedup::types::SourceId;
use crate::error::{Error, Result};
use crate::mmap::{ByteSource, SourceOpener};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

enum SlotState {
    Ready(Arc<dyn ByteSource>),
    Failed(String),
}

/// One source as seen by a reader: unmapped until first use, then either
/// mapped or permanently failed.
///
/// Concurrent first accesses block on the same initialisation, so a source is
/// opened at most once per reader.
pub(crate) struct SourceSlot {
    id: SourceId,
    path: PathBuf,
    expected_size: u64,
    state: OnceLock<SlotState>,
}

impl SourceSlot {
    pub fn new(id: SourceId, path: PathBuf, expected_size: u64) -> Self {
        Self {
            id,
            path,
            expected_size,
            state: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of this source, mapping it on first call.
    pub fn get(&self, opener: &dyn SourceOpener) -> Result<&Arc<dyn ByteSource>> {
        match self.state.get_or_init(|| self.init(opener)) {
            SlotState::Ready(bytes) => Ok(bytes),
            SlotState::Failed(reason) => Err(Error::SourceUnavailable {
                source_id: self.id,
                path: self.path.clone(),
                reason: reason.clone(),
            }),
        }
    }

    fn init(&self, opener: &dyn SourceOpener) -> SlotState {
        let bytes = match opener.open(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    source = self.id,
                    path = %self.path.display(),
                    error = %e,
                    "cannot map source"
                );
                return SlotState::Failed(e.to_string());
            }
        };
        if bytes.len() != self.expected_size {
            warn!(
                source = self.id,
                path = %self.path.display(),
                expected = self.expected_size,
                actual = bytes.len(),
                "source size changed"
            );
            return SlotState::Failed(format!(
                "size is {} bytes, expected {}",
                bytes.len(),
                self.expected_size
            ));
        }
        debug!(source = self.id, path = %self.path.display(), "mapped source");
        SlotState::Ready(bytes)
    }

    pub fn status(&self) -> SourceStatus {
        match self.state.get() {
            None => SourceStatus::Pending,
            Some(SlotState::Ready(_)) => SourceStatus::Mapped,
            Some(SlotState::Failed(reason)) => SourceStatus::Unavailable(reason.clone()),
        }
    }
}
