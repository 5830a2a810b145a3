use super::{ByteSource, SourceOpener};
use crate::error::Result;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// In-memory source bytes.
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemorySource {
    #[inline]
    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Opener serving registered in-memory buffers by path.
///
/// Paths that were never registered fail with `NotFound`, like a missing
/// file would. Counts successful opens so tests can observe laziness.
#[derive(Default)]
pub struct MemoryOpener {
    files: RwLock<FxHashMap<PathBuf, Arc<[u8]>>>,
    opens: AtomicUsize,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Arc<[u8]>>) {
        self.files.write().insert(path.into(), data.into());
    }

    pub fn remove(&self, path: &Path) {
        self.files.write().remove(path);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SourceOpener for MemoryOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn ByteSource>> {
        let data = self.files.read().get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no in-memory source at {}", path.display()),
            )
        })?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySource { data }))
    }
}
