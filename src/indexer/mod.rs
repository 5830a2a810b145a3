//! Source indexing.
//!
//! Walks a Matroska file (EBML header, Segment, Cluster, SimpleBlock and
//! BlockGroup/Block) and turns every block's frame payload into a
//! fingerprinted [`Chunk`]. Block headers and all other elements are metadata
//! and stay in the gaps between chunks.

pub mod types;

pub use types::*;

use crate::container::ids;
use crate::container::vint::read_vint;
use crate::container::{Element, ElementIter};
use crate::dedup::types::SourceId;
use crate::error::{Error, Result};
use crate::mmap::SourceOpener;
use crate::utils::fingerprint;
use memchr::memmem;
use rayon::prelude::*;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info, warn};

/// Track number vint + 16-bit timecode + flags byte.
const BLOCK_FIXED_HEADER: u64 = 3;

const CLUSTER_ID_BYTES: [u8; 4] = ids::CLUSTER.to_be_bytes();

/// Turns source files into ordered chunk sequences.
#[derive(Debug, Clone, Default)]
pub struct Indexer {
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(config: IndexerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Index the file at `path`. The bytes come from `opener`, so sources
    /// that are already mapped by a Reader are not mapped twice.
    pub fn index_source(
        &self,
        id: SourceId,
        path: &Path,
        opener: &dyn SourceOpener,
    ) -> std::result::Result<IndexedSource, PartialIndex> {
        let bytes = opener.open(path).map_err(|error| PartialIndex {
            chunks: Vec::new(),
            error,
        })?;
        let list = self.index_bytes(bytes.bytes())?;

        if !list.is_complete() {
            let skipped: u64 = list.skipped.iter().map(|r| r.end - r.start).sum();
            return Err(PartialIndex {
                chunks: list.chunks,
                error: Error::Fatal(format!(
                    "{} bytes of {} were skipped by resynchronisation",
                    skipped,
                    path.display()
                )),
            });
        }

        info!(
            source = id,
            path = %path.display(),
            chunks = list.chunks.len(),
            indexed_bytes = list.indexed_bytes(),
            "indexed source"
        );
        Ok(IndexedSource {
            id,
            path: path.to_path_buf(),
            size: bytes.len(),
            chunks: list.chunks,
        })
    }

    /// Index an in-memory buffer. Deterministic for a given buffer and policy.
    pub fn index_bytes(&self, data: &[u8]) -> std::result::Result<ChunkList, PartialIndex> {
        let mut blocks = Vec::new();
        let mut skipped = Vec::new();

        let mut result = walk_file(data, &mut blocks);
        if self.config.policy == ParsePolicy::Resync {
            while let Err(Error::Corrupt { offset, reason }) = result {
                let resume = find_cluster(data, offset as usize + 1);
                let end = resume.unwrap_or(data.len());
                warn!(offset, reason, resume_at = end, "skipping corrupt region");
                skipped.push(offset..end as u64);
                result = match resume {
                    Some(pos) => {
                        let iter = ElementIter::range(data, pos, data.len());
                        walk_segment_level(data, iter, &mut blocks)
                    }
                    None => Ok(()),
                };
            }
        }

        let chunks = fingerprint_blocks(data, &blocks);
        match result {
            Ok(()) => {
                debug!(chunks = chunks.len(), skipped = skipped.len(), "walked source");
                Ok(ChunkList { chunks, skipped })
            }
            Err(error) => Err(PartialIndex { chunks, error }),
        }
    }
}

fn fingerprint_blocks(data: &[u8], blocks: &[Range<u64>]) -> Vec<Chunk> {
    blocks
        .par_iter()
        .map(|range| Chunk {
            offset: range.start,
            length: range.end - range.start,
            fingerprint: fingerprint(&data[range.start as usize..range.end as usize]),
        })
        .collect()
}

fn walk_file(data: &[u8], blocks: &mut Vec<Range<u64>>) -> Result<()> {
    let mut top = ElementIter::new(data);
    match top.next() {
        Some(Ok(header)) if header.id == ids::EBML_HEADER => {}
        Some(Err(e)) => return Err(e),
        _ => return Err(Error::corrupt(0, "missing EBML header")),
    }

    for element in top {
        let element = element?;
        if element.id == ids::SEGMENT {
            walk_segment_level(data, element.children(data), blocks)?;
        }
    }
    Ok(())
}

/// Walk segment-level siblings, descending into clusters.
fn walk_segment_level(
    data: &[u8],
    mut iter: ElementIter<'_>,
    blocks: &mut Vec<Range<u64>>,
) -> Result<()> {
    while let Some(element) = iter.next() {
        let element = element?;
        match element.id {
            ids::CLUSTER => {
                let cluster_end = walk_cluster(data, &element, blocks)?;
                if element.is_unknown_size() {
                    iter.seek(cluster_end);
                }
            }
            // A resync can land in front of a second segment.
            ids::SEGMENT => walk_segment_level(data, element.children(data), blocks)?,
            _ => {}
        }
    }
    Ok(())
}

/// Collect the blocks of one cluster; returns where the cluster ended.
fn walk_cluster(data: &[u8], cluster: &Element, blocks: &mut Vec<Range<u64>>) -> Result<usize> {
    let mut children = cluster.children(data);
    for child in children.by_ref() {
        let child = child?;
        match child.id {
            ids::SIMPLE_BLOCK => push_block(data, &child, blocks)?,
            ids::BLOCK_GROUP => {
                for member in child.children(data) {
                    let member = member?;
                    if member.id == ids::BLOCK {
                        push_block(data, &member, blocks)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(children.position())
}

/// Record the frame payload of a (Simple)Block, skipping its header.
fn push_block(data: &[u8], block: &Element, blocks: &mut Vec<Range<u64>>) -> Result<()> {
    let bounded = &data[..block.data_end as usize];
    let (_track, track_len) = read_vint(bounded, block.data_start as usize)?;
    let header_len = track_len as u64 + BLOCK_FIXED_HEADER;
    if header_len > block.data_len() {
        return Err(Error::corrupt(block.header_start, "block header truncated"));
    }
    let payload = block.data_start + header_len..block.data_end;
    if !payload.is_empty() {
        blocks.push(payload);
    }
    Ok(())
}

/// Next offset at or after `from` that starts with the Cluster ID.
fn find_cluster(data: &[u8], from: usize) -> Option<usize> {
    let haystack = data.get(from..)?;
    memmem::find(haystack, &CLUSTER_ID_BYTES).map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::writer::{matroska_file, ElementWriter};
    use crate::mmap::MemoryOpener;

    fn frames(seed: u8, count: usize, len: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|i| (0..len).map(|j| seed.wrapping_add((i * 31 + j) as u8)).collect())
            .collect()
    }

    #[test]
    fn test_chunks_cover_frame_payloads() {
        let clusters = vec![frames(1, 3, 100), frames(2, 2, 50)];
        let file = matroska_file("a", &clusters);

        let list = Indexer::default().index_bytes(&file).unwrap();
        assert_eq!(list.chunks.len(), 5);
        assert!(list.is_complete());

        let expected: Vec<&Vec<u8>> = clusters.iter().flatten().collect();
        for (chunk, frame) in list.chunks.iter().zip(expected) {
            let bytes = &file[chunk.offset as usize..chunk.end() as usize];
            assert_eq!(bytes, frame.as_slice());
            assert_eq!(chunk.fingerprint, fingerprint(frame));
        }
    }

    #[test]
    fn test_chunks_are_ordered_and_disjoint() {
        let file = matroska_file("a", &[frames(1, 10, 64), frames(9, 10, 64)]);
        let list = Indexer::default().index_bytes(&file).unwrap();
        for pair in list.chunks.windows(2) {
            assert!(pair[0].end() <= pair[1].offset);
        }
    }

    #[test]
    fn test_indexing_is_deterministic() {
        let file = matroska_file("a", &[frames(4, 20, 300)]);
        let a = Indexer::default().index_bytes(&file).unwrap();
        let b = Indexer::default().index_bytes(&file).unwrap();
        assert_eq!(a.chunks, b.chunks);
    }

    #[test]
    fn test_block_groups_and_unknown_size_clusters() {
        let mut w = ElementWriter::new();
        w.master(ids::EBML_HEADER, |h| {
            h.element(0x4282, b"matroska");
        });
        w.unknown_master(ids::SEGMENT, |s| {
            s.unknown_master(ids::CLUSTER, |c| {
                c.uint(ids::TIMECODE, 0);
                c.simple_block(1, 0, &[1; 16]);
                c.block_group(2, 10, &[2; 24]);
            });
            s.master(ids::CLUSTER, |c| {
                c.uint(ids::TIMECODE, 1000);
                c.simple_block(1, 0, &[3; 8]);
            });
        });
        let file = w.into_inner();

        let list = Indexer::default().index_bytes(&file).unwrap();
        let lengths: Vec<u64> = list.chunks.iter().map(|c| c.length).collect();
        assert_eq!(lengths, vec![16, 24, 8]);
    }

    #[test]
    fn test_missing_ebml_header_is_corrupt() {
        let err = Indexer::default().index_bytes(b"\x1F\x43\xB6\x75\x80").unwrap_err();
        assert!(err.error.is_corrupt());
        assert!(err.chunks.is_empty());
    }

    fn file_with_corrupt_middle() -> (Vec<u8>, usize) {
        let mut w = ElementWriter::new();
        w.master(ids::EBML_HEADER, |h| {
            h.element(0x4282, b"matroska");
        });
        w.unknown_master(ids::SEGMENT, |s| {
            s.master(ids::CLUSTER, |c| {
                c.simple_block(1, 0, &[1; 32]);
            });
            // A byte with no vint marker where the next element id should be.
            s.raw(&[0x00, 0x00]);
            s.master(ids::CLUSTER, |c| {
                c.simple_block(1, 0, &[2; 32]);
            });
        });
        let file = w.into_inner();
        let corrupt_at = memmem::find(&file, &[0x00, 0x00, 0x1F, 0x43]).unwrap();
        (file, corrupt_at)
    }

    #[test]
    fn test_abort_policy_reports_partial_chunks() {
        let (file, corrupt_at) = file_with_corrupt_middle();
        let partial = Indexer::default().index_bytes(&file).unwrap_err();
        assert_eq!(partial.chunks.len(), 1);
        assert!(matches!(
            partial.error,
            Error::Corrupt { offset, .. } if offset == corrupt_at as u64
        ));
    }

    #[test]
    fn test_resync_policy_skips_to_next_cluster() {
        let (file, corrupt_at) = file_with_corrupt_middle();
        let indexer = Indexer::new(IndexerConfig {
            policy: ParsePolicy::Resync,
        });
        let list = indexer.index_bytes(&file).unwrap();
        assert_eq!(list.chunks.len(), 2);
        assert_eq!(list.skipped, vec![corrupt_at as u64..corrupt_at as u64 + 2]);
        assert!(!list.is_complete());
    }

    #[test]
    fn test_index_source_rejects_resynced_index() {
        let (file, _) = file_with_corrupt_middle();
        let opener = MemoryOpener::new();
        opener.insert("/bad.mkv", file);
        let indexer = Indexer::new(IndexerConfig {
            policy: ParsePolicy::Resync,
        });
        let partial = indexer
            .index_source(0, Path::new("/bad.mkv"), &opener)
            .unwrap_err();
        assert_eq!(partial.chunks.len(), 2);
        assert!(matches!(partial.error, Error::Fatal(_)));
    }

    #[test]
    fn test_index_source_records_size() {
        let file = matroska_file("a", &[frames(1, 2, 10)]);
        let opener = MemoryOpener::new();
        opener.insert("/a.mkv", file.clone());
        let source = Indexer::default()
            .index_source(3, Path::new("/a.mkv"), &opener)
            .unwrap();
        assert_eq!(source.id, 3);
        assert_eq!(source.size, file.len() as u64);
        assert_eq!(source.chunks.len(), 2);
    }
}
