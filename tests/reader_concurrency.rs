//! Many readers over the same dedup file, each shared by many threads.

mod common;

use common::{frames, media, write};
use mkvdedup::container::writer::matroska_file;
use mkvdedup::mmap::{MapRegistry, MmapOpener};
use mkvdedup::reader::{Reader, ReaderOptions};
use mkvdedup::{build_dedup_file, BuildConfig};
use std::sync::Arc;
use tempfile::TempDir;

const READERS: usize = 4;
const THREADS: usize = 8;

fn library(dir: &TempDir) -> (std::path::PathBuf, Vec<u8>) {
    let a = media(21, 4, 8, 2500);
    let mut mixed = frames(2100, 8, 2500);
    mixed.extend(frames(22, 5, 1800));
    mixed.extend(frames(2103, 8, 2500));
    let b = matroska_file("mixed", &[mixed]);

    let sources = vec![write(dir.path(), "a.mkv", &a), write(dir.path(), "b.mkv", &b)];
    let output = dir.path().join("b.dedup");
    build_dedup_file(&sources, &output, &BuildConfig::default()).unwrap();
    (output, b)
}

#[test]
fn test_readers_and_threads_agree() {
    let dir = TempDir::new().unwrap();
    let (output, expected) = library(&dir);
    let size = expected.len();

    let readers: Vec<Reader> = (0..READERS)
        .map(|i| {
            if i % 2 == 0 {
                Reader::open(&output).unwrap()
            } else {
                Reader::open_lazy(&output).unwrap()
            }
        })
        .collect();

    std::thread::scope(|s| {
        for (r, reader) in readers.iter().enumerate() {
            for t in 0..THREADS {
                let expected = &expected;
                s.spawn(move || {
                    let mut state = (r * THREADS + t) as u64 + 1;
                    let mut buf = vec![0u8; 8192];
                    for _ in 0..300 {
                        state = state
                            .wrapping_mul(6364136223846793005)
                            .wrapping_add(1442695040888963407);
                        let offset = (state >> 33) as usize % size;
                        let len = 1 + (state >> 17) as usize % buf.len();
                        let n = reader.read_at(&mut buf[..len], offset as u64).unwrap();
                        assert_eq!(n, len.min(size - offset));
                        assert_eq!(&buf[..n], &expected[offset..offset + n]);
                    }
                });
            }
        }
    });
}

#[test]
fn test_get_entry_is_stable() {
    let dir = TempDir::new().unwrap();
    let (output, _) = library(&dir);
    let reader = Reader::open(&output).unwrap();
    for i in 0..reader.entries().len() {
        assert_eq!(reader.get_entry(i), reader.get_entry(i));
        assert_eq!(reader.get_entry(i).as_ref(), reader.entries().get(i));
    }
    assert_eq!(reader.get_entry(reader.entries().len()), None);
}

#[test]
fn test_readers_share_mappings() {
    let dir = TempDir::new().unwrap();
    let (output, _) = library(&dir);

    let registry = Arc::new(MapRegistry::new());
    let options = || ReaderOptions::new().opener(Arc::new(MmapOpener::new(registry.clone())));
    let first = Reader::open_with(&output, options()).unwrap();
    let second = Reader::open_with(&output, options()).unwrap();
    assert_eq!(registry.live_mappings(), 2);

    drop(first);
    assert_eq!(registry.live_mappings(), 2);
    drop(second);
    assert_eq!(registry.live_mappings(), 0);
}
