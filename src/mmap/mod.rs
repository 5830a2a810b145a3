//! Read-only views of source bytes.
//!
//! Readers and the matcher never touch files directly; they ask a
//! [`SourceOpener`] for a [`ByteSource`]. Two implementations exist:
//!
//! - [`MmapOpener`] maps files through a shared, reference-counted
//!   [`MapRegistry`], so every Reader over the same source shares one mapping
//! - [`MemoryOpener`] serves in-memory buffers, for tests and tooling

mod memory;
mod registry;

pub use memory::{MemoryOpener, MemorySource};
pub use registry::{MapRegistry, Mapping};

use crate::error::Result;
use std::path::Path;
use std::sync::Arc;

/// Capability: addressable, immutable bytes of one source.
///
/// Out-of-range slicing is a caller bug and panics like any slice index.
pub trait ByteSource: Send + Sync {
    fn bytes(&self) -> &[u8];

    fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    #[inline]
    fn slice(&self, offset: u64, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.bytes()[start..start + len]
    }
}

/// Capability: produce a [`ByteSource`] for a path.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn ByteSource>>;
}

/// Opener backed by memory maps from a [`MapRegistry`].
#[derive(Clone)]
pub struct MmapOpener {
    registry: Arc<MapRegistry>,
}

impl MmapOpener {
    pub fn new(registry: Arc<MapRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MapRegistry> {
        &self.registry
    }
}

impl Default for MmapOpener {
    /// Uses the process-wide registry so independent Readers share mappings.
    fn default() -> Self {
        Self::new(MapRegistry::global())
    }
}

impl SourceOpener for MmapOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn ByteSource>> {
        let mapping: Arc<dyn ByteSource> = self.registry.acquire(path)?;
        Ok(mapping)
    }
}
