//! Random-access reconstruction of a deduplicated file.
//!
//! A [`Reader`] loads a dedup file, checks it, and serves reads of the logical
//! file by copying from the sources its entries point at. Sources are mapped
//! through a [`SourceOpener`]; with the default opener every reader in the
//! process shares one mapping per source file.
//!
//! Readers are immutable after open and safe to share across threads. The
//! only mutable state is a lookup hint used to skip the binary search for
//! sequential reads.

mod cursor;
mod integrity;
mod slot;

pub use cursor::ReaderCursor;
pub use integrity::{EntryFailure, EntryMismatch, IntegrityReport};

use crate::dedup::format::{self, VERSION};
use crate::dedup::stats::{Info, SourceStatus, SourceSummary};
use crate::dedup::types::{DedupIndex, Entry, SourceId};
use crate::error::{Error, Result};
use crate::mmap::{ByteSource, MmapOpener, SourceOpener};
use crate::utils::fingerprint_large;
use memmap2::Mmap;
use rayon::prelude::*;
use slot::SourceSlot;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// How a [`Reader`] maps its sources.
#[derive(Clone, Default)]
pub struct ReaderOptions {
    /// Map sources on first read instead of at open
    pub lazy: bool,
    /// Where source bytes come from (default: the shared mmap registry)
    pub opener: Option<Arc<dyn SourceOpener>>,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = Some(opener);
        self
    }
}

/// Reader over one dedup file.
pub struct Reader {
    index: Arc<DedupIndex>,
    slots: Vec<SourceSlot>,
    opener: Arc<dyn SourceOpener>,
    /// Entry that served the most recent read
    hint: AtomicUsize,
    path: Option<PathBuf>,
    version: u32,
    has_fingerprints: bool,
}

impl Reader {
    /// Open a dedup file and map every source it references.
    ///
    /// A source that cannot be mapped does not fail the open; reads touching
    /// it fail with [`Error::SourceUnavailable`].
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, ReaderOptions::new())
    }

    /// Open a dedup file, deferring each source's mapping to its first read.
    pub fn open_lazy(path: &Path) -> Result<Self> {
        Self::open_with(path, ReaderOptions::new().lazy(true))
    }

    pub fn open_with(path: &Path, options: ReaderOptions) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let (header, index) = if len == 0 {
            format::read_index(&[])?
        } else {
            let mmap = unsafe { Mmap::map(&file)? };
            format::read_index(&mmap)?
        };

        let base = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut reader = Self::assemble(Arc::new(index), base, options)?;
        reader.path = Some(path.to_path_buf());
        reader.version = header.version;
        reader.has_fingerprints = header.has_fingerprints();
        info!(
            path = %path.display(),
            entries = reader.index.entries().len(),
            logical_size = reader.size(),
            "opened dedup file"
        );
        Ok(reader)
    }

    /// Serve an index that is already in memory. Relative source paths
    /// resolve against `base`, or the working directory without one.
    pub fn from_index(
        index: Arc<DedupIndex>,
        base: Option<&Path>,
        options: ReaderOptions,
    ) -> Result<Self> {
        Self::assemble(index, base, options)
    }

    fn assemble(
        index: Arc<DedupIndex>,
        base: Option<&Path>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let slots = index
            .sources()
            .iter()
            .map(|s| SourceSlot::new(s.id, resolve(base, &s.path), s.size))
            .collect();
        let opener: Arc<dyn SourceOpener> = match options.opener {
            Some(opener) => opener,
            None => Arc::new(MmapOpener::default()),
        };

        let reader = Self {
            index,
            slots,
            opener,
            hint: AtomicUsize::new(0),
            path: None,
            version: VERSION,
            has_fingerprints: true,
        };

        if !options.lazy {
            let mut referenced = vec![false; reader.slots.len()];
            for entry in reader.index.entries() {
                referenced[entry.source_id as usize] = true;
            }
            let failed = reader
                .slots
                .iter()
                .zip(referenced)
                .filter(|(_, used)| *used)
                .filter(|(slot, _)| slot.get(reader.opener.as_ref()).is_err())
                .count();
            debug!(sources = reader.slots.len(), failed, "mapped sources");
        }
        Ok(reader)
    }

    /// Logical size of the reconstructed file.
    #[inline]
    pub fn size(&self) -> u64 {
        self.index.logical_size()
    }

    pub fn index(&self) -> &Arc<DedupIndex> {
        &self.index
    }

    pub fn entries(&self) -> &[Entry] {
        self.index.entries()
    }

    pub fn get_entry(&self, i: usize) -> Option<Entry> {
        self.index.entry(i).copied()
    }

    pub fn find_entries_for_range(&self, offset: u64, length: u64) -> &[Entry] {
        self.index.find_entries_for_range(offset, length)
    }

    /// Path a source is read from, after resolving relative paths.
    pub fn source_path(&self, id: SourceId) -> Option<&Path> {
        self.slots.get(id as usize).map(|s| s.path())
    }

    pub fn source_status(&self, id: SourceId) -> Option<SourceStatus> {
        self.slots.get(id as usize).map(|s| s.status())
    }

    /// Copy logical bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, which is less than `buf.len()`
    /// only at the end of the file (0 at or past it).
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let size = self.size();
        if buf.is_empty() || offset >= size {
            return Ok(0);
        }
        let end = offset.saturating_add(buf.len() as u64).min(size);
        let hint = self.hint.load(Ordering::Relaxed);
        let Some(first) = self.index.locate(offset, Some(hint)) else {
            return Ok(0);
        };
        let entries = self.index.entries_from(first, end);

        let mut pos = offset;
        let mut written = 0usize;
        for entry in entries {
            let within = pos - entry.logical_offset;
            let n = (entry.logical_end().min(end) - pos) as usize;
            let source = self.slots[entry.source_id as usize].get(self.opener.as_ref())?;
            let bytes = source.slice(entry.source_offset + within, n);
            buf[written..written + n].copy_from_slice(bytes);
            written += n;
            pos += n as u64;
        }

        self.hint
            .store(first + entries.len().saturating_sub(1), Ordering::Relaxed);
        Ok(written)
    }

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let n = self.read_at(buf, offset)?;
        if n < buf.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at {offset} ends past {}", buf.len(), self.size()),
            )));
        }
        Ok(())
    }

    /// Stream-style access with its own position.
    pub fn cursor(&self) -> ReaderCursor<'_> {
        ReaderCursor::new(self)
    }

    /// Re-hash every entry and compare with the recorded fingerprints.
    pub fn verify_integrity(&self) -> IntegrityReport {
        if !self.has_fingerprints {
            return IntegrityReport::default();
        }

        enum Outcome {
            Ok(u64),
            Mismatch(EntryMismatch),
            Failed(EntryFailure),
        }

        let outcomes: Vec<Outcome> = self
            .entries()
            .par_iter()
            .enumerate()
            .map(|(i, entry)| {
                let source = match self.slots[entry.source_id as usize].get(self.opener.as_ref()) {
                    Ok(source) => source,
                    Err(e) => {
                        return Outcome::Failed(EntryFailure {
                            entry: i,
                            source_id: entry.source_id,
                            reason: e.to_string(),
                        });
                    }
                };
                let bytes = source.slice(entry.source_offset, entry.length as usize);
                let actual = fingerprint_large(bytes);
                if actual == entry.fingerprint {
                    Outcome::Ok(entry.length)
                } else {
                    Outcome::Mismatch(EntryMismatch {
                        entry: i,
                        source_id: entry.source_id,
                        expected: entry.fingerprint,
                        actual,
                    })
                }
            })
            .collect();

        let mut report = IntegrityReport {
            fingerprints_present: true,
            ..IntegrityReport::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Ok(bytes) => {
                    report.entries_checked += 1;
                    report.bytes_checked += bytes;
                }
                Outcome::Mismatch(m) => {
                    report.entries_checked += 1;
                    report.mismatches.push(m);
                }
                Outcome::Failed(f) => report.failures.push(f),
            }
        }
        info!(
            checked = report.entries_checked,
            mismatches = report.mismatches.len(),
            failures = report.failures.len(),
            "verified entries"
        );
        report
    }

    /// Summary of the file and each source's share of it.
    pub fn info(&self) -> Info {
        let mut referenced = vec![(0u64, 0usize); self.slots.len()];
        for entry in self.entries() {
            let slot = &mut referenced[entry.source_id as usize];
            slot.0 += entry.length;
            slot.1 += 1;
        }
        let sources = self
            .index
            .sources()
            .iter()
            .zip(&self.slots)
            .zip(referenced)
            .map(|((source, slot), (bytes, count))| SourceSummary {
                id: source.id,
                path: slot.path().to_path_buf(),
                size: source.size,
                referenced_bytes: bytes,
                entry_count: count,
                status: slot.status(),
            })
            .collect();

        Info {
            path: self.path.clone(),
            version: self.version,
            logical_size: self.size(),
            entry_count: self.entries().len(),
            source_count: self.index.sources().len(),
            has_fingerprints: self.has_fingerprints,
            sources,
        }
    }
}

fn resolve(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::types::{SourceInfo, tests::entry};
    use crate::mmap::MemoryOpener;
    use crate::utils::fingerprint;
    use std::io::{Read, Seek, SeekFrom};

    /// Logical file of 300 bytes: 100 from source 0, 50 from source 1 at
    /// offset 10, 150 from source 2.
    fn setup(lazy: bool) -> (Arc<MemoryOpener>, Reader, Vec<u8>) {
        let data: Vec<Vec<u8>> = vec![
            (0..1000u32).map(|i| (i % 251) as u8).collect(),
            (0..60u32).map(|i| 200 + (i % 50) as u8).collect(),
            (0..150u32).map(|i| (i * 7 % 256) as u8).collect(),
        ];
        let opener = Arc::new(MemoryOpener::new());
        let mut sources = Vec::new();
        for (i, bytes) in data.iter().enumerate() {
            let path = PathBuf::from(format!("/src/{i}.mkv"));
            opener.insert(path.clone(), bytes.clone());
            sources.push(SourceInfo {
                id: i as SourceId,
                path,
                size: bytes.len() as u64,
                fingerprint: fingerprint(bytes),
            });
        }

        let mut entries = vec![entry(0, 100, 0, 0), entry(100, 50, 1, 10), entry(150, 150, 2, 0)];
        let mut expected = Vec::new();
        for e in &mut entries {
            let range = e.source_offset as usize..e.source_end() as usize;
            let bytes = &data[e.source_id as usize][range];
            e.fingerprint = fingerprint(bytes);
            expected.extend_from_slice(bytes);
        }

        let index = DedupIndex::new(300, entries, sources).unwrap();
        let options = ReaderOptions::new().lazy(lazy).opener(opener.clone());
        let reader = Reader::from_index(Arc::new(index), None, options).unwrap();
        (opener, reader, expected)
    }

    #[test]
    fn test_read_whole_file() {
        let (_, reader, expected) = setup(false);
        let mut buf = vec![0u8; 300];
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 300);
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_read_spanning_entries() {
        let (_, reader, expected) = setup(false);
        let mut buf = vec![0u8; 60];
        assert_eq!(reader.read_at(&mut buf, 95).unwrap(), 60);
        assert_eq!(buf, &expected[95..155]);
    }

    #[test]
    fn test_every_offset_and_length() {
        let (_, reader, expected) = setup(false);
        for offset in (0..300).step_by(7) {
            for len in [1usize, 5, 49, 50, 51, 120, 400] {
                let mut buf = vec![0u8; len];
                let n = reader.read_at(&mut buf, offset as u64).unwrap();
                let want = &expected[offset..(offset + len).min(300)];
                assert_eq!(n, want.len());
                assert_eq!(&buf[..n], want);
            }
        }
    }

    #[test]
    fn test_reads_at_and_past_end() {
        let (_, reader, _) = setup(false);
        let mut buf = [0u8; 10];
        assert_eq!(reader.read_at(&mut buf, 300).unwrap(), 0);
        assert_eq!(reader.read_at(&mut buf, u64::MAX).unwrap(), 0);
        assert_eq!(reader.read_at(&mut buf, 295).unwrap(), 5);
        assert_eq!(reader.read_at(&mut [], 0).unwrap(), 0);
    }

    #[test]
    fn test_read_exact_at_short_is_eof() {
        let (_, reader, _) = setup(false);
        let mut buf = [0u8; 10];
        reader.read_exact_at(&mut buf, 290).unwrap();
        let err = reader.read_exact_at(&mut buf, 295).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_get_entry() {
        let (_, reader, _) = setup(false);
        assert_eq!(reader.get_entry(1).unwrap().source_offset, 10);
        assert!(reader.get_entry(3).is_none());
    }

    #[test]
    fn test_eager_open_maps_referenced_sources() {
        let (opener, reader, _) = setup(false);
        assert_eq!(opener.open_count(), 3);
        assert_eq!(reader.source_status(0), Some(SourceStatus::Mapped));
    }

    #[test]
    fn test_lazy_open_maps_on_demand() {
        let (opener, reader, _) = setup(true);
        assert_eq!(opener.open_count(), 0);
        assert_eq!(reader.source_status(1), Some(SourceStatus::Pending));

        let mut buf = [0u8; 10];
        reader.read_at(&mut buf, 110).unwrap();
        assert_eq!(opener.open_count(), 1);
        assert_eq!(reader.source_status(1), Some(SourceStatus::Mapped));
        assert_eq!(reader.source_status(0), Some(SourceStatus::Pending));

        reader.read_at(&mut buf, 120).unwrap();
        assert_eq!(opener.open_count(), 1);
    }

    #[test]
    fn test_missing_source_fails_only_its_reads() {
        let opener = Arc::new(MemoryOpener::new());
        let (_, healthy, expected) = setup(true);
        for (i, source) in healthy.index().sources().iter().enumerate() {
            if i != 2 {
                opener.insert(source.path.clone(), source_bytes(&healthy, i));
            }
        }
        let reader = Reader::from_index(
            healthy.index().clone(),
            None,
            ReaderOptions::new().lazy(true).opener(opener.clone()),
        )
        .unwrap();

        let mut buf = [0u8; 100];
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 100);
        assert_eq!(&buf[..], &expected[..100]);

        let err = reader.read_at(&mut buf, 200).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { source_id: 2, .. }));

        // Other ranges keep working after the failure.
        let mut buf = [0u8; 40];
        assert_eq!(reader.read_at(&mut buf, 105).unwrap(), 40);
        assert_eq!(&buf[..], &expected[105..145]);
    }

    fn source_bytes(reader: &Reader, id: usize) -> Vec<u8> {
        let source = reader.slots[id].get(reader.opener.as_ref()).unwrap();
        source.bytes().to_vec()
    }

    #[test]
    fn test_verify_integrity_clean() {
        let (_, reader, _) = setup(false);
        let report = reader.verify_integrity();
        assert!(report.is_clean());
        assert_eq!(report.entries_checked, 3);
        assert_eq!(report.bytes_checked, 300);
    }

    #[test]
    fn test_verify_integrity_reports_mismatch() {
        let (opener, healthy, _) = setup(true);
        let mut tampered = source_bytes(&healthy, 1);
        tampered[20] ^= 0xFF;
        opener.insert("/src/1.mkv", tampered);

        let reader = Reader::from_index(
            healthy.index().clone(),
            None,
            ReaderOptions::new().opener(opener.clone()),
        )
        .unwrap();
        let report = reader.verify_integrity();
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].entry, 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_verify_integrity_separates_io_failures() {
        let (opener, healthy, _) = setup(true);
        opener.remove(Path::new("/src/0.mkv"));
        let reader = Reader::from_index(
            healthy.index().clone(),
            None,
            ReaderOptions::new().opener(opener.clone()),
        )
        .unwrap();
        let report = reader.verify_integrity();
        assert!(report.mismatches.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_id, 0);
        assert_eq!(report.entries_checked, 2);
    }

    #[test]
    fn test_cursor_read_and_seek() {
        let (_, reader, expected) = setup(false);
        let mut cursor = reader.cursor();
        let mut all = Vec::new();
        cursor.read_to_end(&mut all).unwrap();
        assert_eq!(all, expected);

        cursor.seek(SeekFrom::End(-10)).unwrap();
        let mut tail = Vec::new();
        cursor.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &expected[290..]);

        cursor.seek(SeekFrom::Start(100)).unwrap();
        cursor.seek(SeekFrom::Current(-1)).unwrap();
        assert_eq!(cursor.position(), 99);
        assert!(cursor.seek(SeekFrom::Current(-1000)).is_err());
    }

    #[test]
    fn test_info_counts_references() {
        let (_, reader, _) = setup(true);
        let info = reader.info();
        assert_eq!(info.logical_size, 300);
        assert_eq!(info.entry_count, 3);
        assert_eq!(info.source_count, 3);
        let referenced: Vec<u64> = info.sources.iter().map(|s| s.referenced_bytes).collect();
        assert_eq!(referenced, vec![100, 50, 150]);
        assert!(info.sources.iter().all(|s| s.status == SourceStatus::Pending));
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let base = Some(Path::new("/lib"));
        assert_eq!(resolve(base, Path::new("a.mkv")), PathBuf::from("/lib/a.mkv"));
        assert_eq!(resolve(base, Path::new("/abs.mkv")), PathBuf::from("/abs.mkv"));
        assert_eq!(resolve(None, Path::new("a.mkv")), PathBuf::from("a.mkv"));
    }

    #[test]
    fn test_concurrent_reads_agree() {
        let (_, reader, expected) = setup(true);
        std::thread::scope(|s| {
            for t in 0..8usize {
                let reader = &reader;
                let expected = &expected;
                s.spawn(move || {
                    for i in 0..200usize {
                        let offset = (i * 37 + t * 11) % 300;
                        let mut buf = [0u8; 64];
                        let n = reader.read_at(&mut buf, offset as u64).unwrap();
                        assert_eq!(&buf[..n], &expected[offset..(offset + 64).min(300)]);
                    }
                });
            }
        });
    }
}
