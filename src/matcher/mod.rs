//! Cross-source matching.
//!
//! Chunks are grouped by fingerprint across all sources. For every chunk of a
//! target the matcher looks up chunks with the same fingerprint in other
//! sources, confirms the bytes, and grows the match byte-wise in both
//! directions so runs also swallow the block headers and metadata between
//! identical frames.
//!
//! Work is split into fixed-size segments of a target's chunk list and spread
//! over a bounded rayon pool. Each segment owns a window of the target's bytes
//! and never extends a run outside it, so every target byte is compared by at
//! most one segment. Segment boundaries do not depend on the worker count and
//! results are joined in segment order, so the output is the same for any
//! number of workers.

mod extend;
pub mod types;

pub use types::*;

use crate::dedup::types::SourceId;
use crate::error::{Error, Result};
use crate::indexer::{Chunk, IndexedSource};
use crate::mmap::{ByteSource, MmapOpener, SourceOpener};
use crate::utils::Fingerprint;
use extend::{common_prefix_len, common_suffix_len};
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Chunks of one target handled by a single work item.
const SEGMENT_CHUNKS: usize = 1024;

/// A chunk as seen from the fingerprint table.
#[derive(Debug, Clone, Copy)]
struct ChunkRef {
    source_id: SourceId,
    offset: u64,
    length: u64,
}

/// One unit of parallel work: a slice of a target's chunks and the byte
/// window `[start, end)` its runs must stay inside.
#[derive(Debug, Clone, Copy)]
struct WorkItem<'a> {
    target: SourceId,
    chunks: &'a [Chunk],
    start: u64,
    end: u64,
}

/// Split a target into work items whose windows tile `[0, size)`.
///
/// A window starts at its first chunk and ends where the next segment's
/// first chunk begins, so the metadata between two segments belongs to the
/// earlier one.
fn work_items(source: &IndexedSource) -> Vec<WorkItem<'_>> {
    let segments: Vec<&[Chunk]> = source.chunks.chunks(SEGMENT_CHUNKS).collect();
    segments
        .iter()
        .enumerate()
        .map(|(i, &chunks)| WorkItem {
            target: source.id,
            chunks,
            start: if i == 0 { 0 } else { chunks[0].offset },
            end: segments.get(i + 1).map_or(source.size, |next| next[0].offset),
        })
        .collect()
}

type MapSlot = OnceLock<std::result::Result<Arc<dyn ByteSource>, String>>;

/// Everything a worker needs, shared across the pool.
///
/// Sources are mapped by the first worker that touches them; a source that
/// cannot be mapped, or no longer has its indexed size, fails that worker.
struct MatchContext<'a> {
    sources: &'a [IndexedSource],
    opener: &'a dyn SourceOpener,
    maps: Vec<MapSlot>,
    /// Per fingerprint, candidates sorted by `(source_id, offset)`
    table: FxHashMap<Fingerprint, Vec<ChunkRef>>,
}

impl<'a> MatchContext<'a> {
    fn new(sources: &'a [IndexedSource], opener: &'a dyn SourceOpener) -> Self {
        Self {
            sources,
            opener,
            maps: sources.iter().map(|_| OnceLock::new()).collect(),
            table: build_table(sources),
        }
    }

    fn bytes(&self, id: SourceId) -> Result<&[u8]> {
        let source = &self.sources[id as usize];
        let slot = self.maps[id as usize].get_or_init(|| {
            let map = self
                .opener
                .open(&source.path)
                .map_err(|e| format!("cannot map {}: {e}", source.path.display()))?;
            if map.len() != source.size {
                return Err(format!(
                    "{} changed since indexing ({} bytes, now {})",
                    source.path.display(),
                    source.size,
                    map.len()
                ));
            }
            debug!(source = id, path = %source.path.display(), "mapped source for matching");
            Ok(map)
        });
        match slot {
            Ok(map) => Ok(map.bytes()),
            Err(reason) => Err(Error::Fatal(reason.clone())),
        }
    }
}

/// Best extension found for one target chunk.
#[derive(Debug, Clone, Copy)]
struct Extension {
    source_id: SourceId,
    target_start: u64,
    source_start: u64,
    length: u64,
}

/// Marker for a work item that stopped because the batch failed.
struct Aborted;

/// Finds identical byte runs between indexed sources.
pub struct Matcher {
    config: MatcherConfig,
    opener: Arc<dyn SourceOpener>,
}

impl Matcher {
    /// Matcher reading sources through the shared mmap registry.
    pub fn new(config: MatcherConfig) -> Self {
        Self::with_opener(config, Arc::new(MmapOpener::default()))
    }

    pub fn with_opener(config: MatcherConfig, opener: Arc<dyn SourceOpener>) -> Self {
        Self { config, opener }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Change the pool size for subsequent calls. Zero is treated as one.
    pub fn set_num_workers(&mut self, n: usize) {
        self.config.num_workers = n.max(1);
    }

    /// Match every source after the first against all the others.
    ///
    /// Source 0 is the reference and is never a target. Runs come out grouped
    /// by target id, each group in target offset order.
    pub fn match_sources(&self, sources: &[IndexedSource]) -> Result<Vec<MatchedRun>> {
        let targets: Vec<SourceId> = sources.iter().skip(1).map(|s| s.id).collect();
        self.run(sources, &targets)
    }

    /// Match a single target against every other source.
    pub fn match_target(
        &self,
        sources: &[IndexedSource],
        target: SourceId,
    ) -> Result<Vec<MatchedRun>> {
        self.run(sources, &[target])
    }

    fn run(&self, sources: &[IndexedSource], targets: &[SourceId]) -> Result<Vec<MatchedRun>> {
        for (i, source) in sources.iter().enumerate() {
            if source.id as usize != i {
                return Err(Error::Fatal(format!(
                    "source at position {i} has id {}",
                    source.id
                )));
            }
        }
        if let Some(&bad) = targets.iter().find(|&&t| t as usize >= sources.len()) {
            return Err(Error::Fatal(format!("unknown target source {bad}")));
        }
        if sources.len() < 2 || targets.is_empty() {
            return Ok(Vec::new());
        }

        let workers = self.config.effective_workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mkvdedup-match-{i}"))
            .build()
            .map_err(|e| Error::Fatal(format!("cannot start matcher workers: {e}")))?;

        pool.install(|| {
            let ctx = MatchContext::new(sources, self.opener.as_ref());
            debug!(
                workers,
                fingerprints = ctx.table.len(),
                "built fingerprint table"
            );

            let work: Vec<WorkItem<'_>> = targets
                .iter()
                .flat_map(|&t| work_items(&sources[t as usize]))
                .collect();

            let cancel = AtomicBool::new(false);
            let first_error: Mutex<Option<Error>> = Mutex::new(None);

            let segments = work
                .par_iter()
                .map(|item| {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(Aborted);
                    }
                    self.match_segment(&ctx, item, &cancel).map_err(|e| {
                        let mut slot = first_error.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        cancel.store(true, Ordering::Relaxed);
                        Aborted
                    })
                })
                .collect::<std::result::Result<Vec<_>, Aborted>>();

            let segments = match segments {
                Ok(segments) => segments,
                Err(Aborted) => {
                    return Err(first_error
                        .lock()
                        .take()
                        .unwrap_or_else(|| Error::Fatal("matching aborted".into())));
                }
            };

            let runs = stitch(&work, segments, self.config.min_run_length);
            info!(
                targets = targets.len(),
                runs = runs.len(),
                matched_bytes = runs.iter().map(|r| r.length).sum::<u64>(),
                "matching complete"
            );
            Ok(runs)
        })
    }

    /// Match one segment of a target inside its window. Backward extension
    /// never crosses the end of the previous run found in this segment.
    ///
    /// Short runs touching either window edge are kept, since they may
    /// continue in the neighbouring segment; [`stitch`] drops them if they
    /// do not.
    fn match_segment(
        &self,
        ctx: &MatchContext<'_>,
        item: &WorkItem<'_>,
        cancel: &AtomicBool,
    ) -> Result<Vec<MatchedRun>> {
        let mut runs = Vec::new();
        let mut covered = item.start;

        for chunk in item.chunks {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Fatal("matching cancelled".into()));
            }
            if chunk.offset < covered {
                continue;
            }
            let Some(ext) = self.best_extension(ctx, item, chunk, covered)? else {
                continue;
            };
            let ext_end = ext.target_start + ext.length;
            let at_edge = ext.target_start == item.start || ext_end == item.end;
            if ext.length < self.config.min_run_length && !at_edge {
                continue;
            }
            covered = ext_end;
            runs.push(MatchedRun::new(
                ext.length,
                vec![
                    Location {
                        source_id: item.target,
                        offset: ext.target_start,
                    },
                    Location {
                        source_id: ext.source_id,
                        offset: ext.source_start,
                    },
                ],
            ));
        }
        Ok(runs)
    }

    /// Among the lowest-id source holding a verified copy of `chunk`, the
    /// candidate giving the longest run (lowest offset on ties).
    fn best_extension(
        &self,
        ctx: &MatchContext<'_>,
        item: &WorkItem<'_>,
        chunk: &Chunk,
        covered: u64,
    ) -> Result<Option<Extension>> {
        let Some(candidates) = ctx.table.get(&chunk.fingerprint) else {
            return Ok(None);
        };
        let data = ctx.bytes(item.target)?;
        let (t_start, len) = (chunk.offset as usize, chunk.length as usize);
        let payload = &data[t_start..t_start + len];
        let before = &data[covered as usize..t_start];
        let after = &data[t_start + len..item.end as usize];

        for group in candidates.chunk_by(|a, b| a.source_id == b.source_id) {
            if group[0].source_id == item.target {
                continue;
            }
            let other = ctx.bytes(group[0].source_id)?;
            let mut best: Option<Extension> = None;

            for candidate in group
                .iter()
                .filter(|c| c.length == chunk.length)
                .take(self.config.max_candidates)
            {
                let c_start = candidate.offset as usize;
                if other[c_start..c_start + len] != *payload {
                    continue;
                }
                let back = common_suffix_len(before, &other[..c_start]);
                let fwd = common_prefix_len(after, &other[c_start + len..]);
                let length = (back + len + fwd) as u64;
                if best.is_none_or(|b| length > b.length) {
                    best = Some(Extension {
                        source_id: candidate.source_id,
                        target_start: (t_start - back) as u64,
                        source_start: (c_start - back) as u64,
                        length,
                    });
                }
            }
            if best.is_some() {
                return Ok(best);
            }
        }
        Ok(None)
    }
}

fn build_table(sources: &[IndexedSource]) -> FxHashMap<Fingerprint, Vec<ChunkRef>> {
    let mut table: FxHashMap<Fingerprint, Vec<ChunkRef>> = FxHashMap::default();
    for source in sources {
        for chunk in &source.chunks {
            table.entry(chunk.fingerprint).or_default().push(ChunkRef {
                source_id: source.id,
                offset: chunk.offset,
                length: chunk.length,
            });
        }
    }
    table
}

/// Concatenate segment results in order, joining runs that continue across
/// a window edge, then drop runs shorter than `min_run_length`.
fn stitch(
    work: &[WorkItem<'_>],
    segments: Vec<Vec<MatchedRun>>,
    min_run_length: u64,
) -> Vec<MatchedRun> {
    let mut runs: Vec<MatchedRun> = Vec::new();
    let mut last_target: Option<SourceId> = None;

    for (item, segment) in work.iter().zip(segments) {
        for run in segment {
            let joins = last_target == Some(item.target)
                && runs.last().is_some_and(|prev| continues(prev, &run));
            match runs.last_mut() {
                Some(prev) if joins => prev.length += run.length,
                _ => runs.push(run),
            }
            last_target = Some(item.target);
        }
    }
    runs.retain(|run| run.length >= min_run_length);
    runs
}

/// True when `next` picks up in every source exactly where `prev` ends.
fn continues(prev: &MatchedRun, next: &MatchedRun) -> bool {
    prev.locations.len() == next.locations.len()
        && prev.locations.iter().zip(&next.locations).all(|(a, b)| {
            a.source_id == b.source_id && a.offset + prev.length == b.offset
        })
}
