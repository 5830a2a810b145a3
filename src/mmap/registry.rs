use super::ByteSource;
use crate::error::Result;
use memmap2::Mmap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

/// A read-only mapping of one file.
///
/// Held behind `Arc`; the file is unmapped when the last holder drops it.
pub struct Mapping {
    path: PathBuf,
    /// `None` for empty files, which cannot be mapped.
    mmap: Option<Mmap>,
}

impl Mapping {
    fn map(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mmap = if len == 0 {
            None
        } else {
            // The format is immutable; sources are never written while mapped.
            Some(unsafe { Mmap::map(&file)? })
        };
        debug!(path = %path.display(), len, "mapped source");
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for Mapping {
    #[inline]
    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "unmapped source");
    }
}

/// Path-keyed table of live mappings.
///
/// The registry holds only weak references: it never keeps a mapping alive
/// on its own. The lock is held while a new mapping is created, so concurrent
/// acquirers of the same path collapse into one `mmap` call.
#[derive(Default)]
pub struct MapRegistry {
    maps: Mutex<FxHashMap<PathBuf, Weak<Mapping>>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by [`super::MmapOpener::default`].
    pub fn global() -> Arc<MapRegistry> {
        static GLOBAL: OnceLock<Arc<MapRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(MapRegistry::new())).clone()
    }

    /// Return the live mapping for `path`, mapping the file if nobody holds
    /// it. A failed acquisition leaves existing mappings untouched.
    pub fn acquire(&self, path: &Path) -> Result<Arc<Mapping>> {
        let key = path.canonicalize()?;
        let mut maps = self.maps.lock();

        if let Some(live) = maps.get(&key).and_then(Weak::upgrade) {
            return Ok(live);
        }

        let mapping = Arc::new(Mapping::map(&key)?);
        maps.retain(|_, weak| weak.strong_count() > 0);
        maps.insert(key, Arc::downgrade(&mapping));
        Ok(mapping)
    }

    /// Number of mappings currently held by at least one holder.
    pub fn live_mappings(&self) -> usize {
        self.maps
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_shares_one_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mkv");
        fs::write(&path, b"hello mapping").unwrap();

        let registry = MapRegistry::new();
        let first = registry.acquire(&path).unwrap();
        let second = registry.acquire(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.live_mappings(), 1);
        assert_eq!(first.bytes(), b"hello mapping");
    }

    #[test]
    fn test_last_release_unmaps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mkv");
        fs::write(&path, b"x").unwrap();

        let registry = MapRegistry::new();
        let first = registry.acquire(&path).unwrap();
        let second = registry.acquire(&path).unwrap();
        drop(first);
        assert_eq!(registry.live_mappings(), 1);
        drop(second);
        assert_eq!(registry.live_mappings(), 0);

        // A fresh acquisition maps again.
        let third = registry.acquire(&path).unwrap();
        assert_eq!(third.bytes(), b"x");
    }

    #[test]
    fn test_failed_second_acquire_keeps_live_mapping() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mkv");
        fs::write(&path, b"still here").unwrap();

        let registry = MapRegistry::new();
        let held = registry.acquire(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(registry.acquire(&path).is_err());
        assert_eq!(held.bytes(), b"still here");
        assert_eq!(registry.live_mappings(), 1);
    }

    #[test]
    fn test_empty_file_maps_to_empty_slice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.mkv");
        fs::write(&path, b"").unwrap();

        let mapping = MapRegistry::new().acquire(&path).unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_concurrent_acquire_collapses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mkv");
        fs::write(&path, vec![3u8; 4096]).unwrap();

        let registry = Arc::new(MapRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let path = path.clone();
                std::thread::spawn(move || registry.acquire(&path).unwrap())
            })
            .collect();
        let maps: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(maps.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
