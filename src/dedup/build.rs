//! Build pipeline: index every source, match the primary against the rest,
//! turn the runs into index entries and write the dedup file atomically.

use super::format::write_index;
use super::types::{BuildConfig, BuildSummary, DedupIndex, Entry, SourceId, SourceInfo};
use crate::error::{Error, Result};
use crate::indexer::{IndexedSource, Indexer};
use crate::matcher::{MatchedRun, Matcher};
use crate::mmap::{ByteSource, MmapOpener, SourceOpener};
use crate::utils::fingerprint_large;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

impl DedupIndex {
    /// Lay out the primary source's byte space from matched runs.
    ///
    /// Each run becomes an entry pointing at its canonical copy; the gaps
    /// between runs point at the primary's own bytes. Adjacent entries that
    /// continue the same source range are merged. `maps` must hold the bytes
    /// of every source, indexed by id, and is used to fingerprint entries.
    pub fn from_runs(
        sources: Vec<SourceInfo>,
        primary: SourceId,
        runs: &[MatchedRun],
        maps: &[Arc<dyn ByteSource>],
    ) -> Result<Self> {
        let primary_size = sources
            .get(primary as usize)
            .ok_or_else(|| Error::Fatal(format!("primary source {primary} does not exist")))?
            .size;
        if maps.len() != sources.len() {
            return Err(Error::Fatal(format!(
                "{} source maps for {} sources",
                maps.len(),
                sources.len()
            )));
        }

        let mut spans: Vec<(u64, u64, SourceId, u64)> = Vec::with_capacity(runs.len());
        for run in runs {
            let (Some(at), Some(canonical)) = (run.location_in(primary), run.canonical_for(primary))
            else {
                continue;
            };
            if canonical.source_id as usize >= sources.len() {
                return Err(Error::Fatal(format!(
                    "matched run at {} refers to unknown source {}",
                    at.offset, canonical.source_id
                )));
            }
            spans.push((at.offset, run.length, canonical.source_id, canonical.offset));
        }
        spans.sort_unstable_by_key(|&(start, ..)| start);

        let mut entries: Vec<Entry> = Vec::with_capacity(spans.len() * 2 + 1);
        let mut cursor = 0u64;
        for (start, length, source_id, source_offset) in spans {
            if start < cursor {
                return Err(Error::Fatal(format!(
                    "matched run at {start} overlaps the previous run ending at {cursor}"
                )));
            }
            if start > cursor {
                push_merged(&mut entries, cursor, start - cursor, primary, cursor);
            }
            push_merged(&mut entries, start, length, source_id, source_offset);
            cursor = start + length;
        }
        if cursor > primary_size {
            return Err(Error::Fatal(format!(
                "matched runs end at {cursor}, past the primary's {primary_size} bytes"
            )));
        }
        if cursor < primary_size {
            push_merged(&mut entries, cursor, primary_size - cursor, primary, cursor);
        }

        for entry in &entries {
            let map = &maps[entry.source_id as usize];
            if entry.source_end() > map.len() {
                return Err(Error::Fatal(format!(
                    "entry at {} reads past the end of source {}",
                    entry.logical_offset, entry.source_id
                )));
            }
        }
        entries.par_iter_mut().for_each(|entry| {
            let map = &maps[entry.source_id as usize];
            let bytes = map.slice(entry.source_offset, entry.length as usize);
            entry.fingerprint = fingerprint_large(bytes);
        });

        Self::from_built(entries, sources)
    }
}

fn push_merged(
    entries: &mut Vec<Entry>,
    logical_offset: u64,
    length: u64,
    source_id: SourceId,
    source_offset: u64,
) {
    if let Some(last) = entries.last_mut() {
        if last.source_id == source_id && last.source_end() == source_offset {
            last.length += length;
            return;
        }
    }
    entries.push(Entry {
        logical_offset,
        length,
        source_id,
        source_offset,
        fingerprint: 0,
    });
}

/// Builds dedup files from a list of sources.
pub struct DedupBuilder {
    config: BuildConfig,
    opener: Arc<dyn SourceOpener>,
}

impl DedupBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self::with_opener(config, Arc::new(MmapOpener::default()))
    }

    pub fn with_opener(config: BuildConfig, opener: Arc<dyn SourceOpener>) -> Self {
        Self { config, opener }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Id of the source being reconstructed.
    pub fn primary(&self, source_count: usize) -> Result<SourceId> {
        if source_count == 0 {
            return Err(Error::Fatal("no sources given".into()));
        }
        let primary = self.config.primary.unwrap_or(source_count - 1);
        if primary >= source_count {
            return Err(Error::Fatal(format!(
                "primary source {primary} out of range ({source_count} sources)"
            )));
        }
        Ok(primary as SourceId)
    }

    /// Run the whole pipeline in memory. Source paths are stored as given.
    pub fn build_index(&self, paths: &[PathBuf]) -> Result<DedupIndex> {
        let primary = self.primary(paths.len())?;

        let started = Instant::now();
        let indexer = Indexer::new(self.config.indexer.clone());
        let indexed: Vec<IndexedSource> = paths
            .par_iter()
            .enumerate()
            .map(|(i, path)| {
                indexer
                    .index_source(i as SourceId, path, self.opener.as_ref())
                    .inspect_err(|partial| {
                        warn!(
                            path = %path.display(),
                            chunks = partial.chunks.len(),
                            error = %partial.error,
                            "indexing failed"
                        )
                    })
            })
            .collect::<std::result::Result<_, _>>()?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "indexed sources");

        let started = Instant::now();
        let matcher = Matcher::with_opener(self.config.matcher.clone(), self.opener.clone());
        let runs = matcher.match_target(&indexed, primary)?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "matched primary");

        let maps: Vec<Arc<dyn ByteSource>> = indexed
            .iter()
            .map(|source| {
                self.opener.open(&source.path).map_err(|e| {
                    Error::Fatal(format!("cannot map {}: {e}", source.path.display()))
                })
            })
            .collect::<Result<_>>()?;
        let sources: Vec<SourceInfo> = indexed
            .iter()
            .zip(&maps)
            .map(|(source, map)| SourceInfo {
                id: source.id,
                path: source.path.clone(),
                size: source.size,
                fingerprint: fingerprint_large(map.bytes()),
            })
            .collect();

        DedupIndex::from_runs(sources, primary, &runs, &maps)
    }

    /// Build and write a dedup file for the primary source to `output`.
    ///
    /// Nothing is left at `output` unless the whole build succeeds.
    pub fn build(&self, paths: &[PathBuf], output: &Path) -> Result<BuildSummary> {
        let started = Instant::now();
        let absolute: Vec<PathBuf> = paths
            .iter()
            .map(fs::canonicalize)
            .collect::<std::io::Result<_>>()?;
        let primary = self.primary(paths.len())?;

        let index = self.build_index(&absolute)?;
        let index = if self.config.relative_paths {
            let base = output_dir(output)?;
            let stored = absolute.iter().map(|p| relative_to(p, &base)).collect();
            index.with_source_paths(stored)
        } else {
            index
        };

        write_atomically(output, &index)?;

        let summary = BuildSummary {
            output: output.to_path_buf(),
            primary,
            logical_size: index.logical_size(),
            entry_count: index.entries().len(),
            source_count: index.sources().len(),
            deduplicated_bytes: index.bytes_outside(primary),
            source_bytes: index.bytes_per_source(),
        };
        info!(
            output = %output.display(),
            entries = summary.entry_count,
            logical_size = summary.logical_size,
            deduplicated_bytes = summary.deduplicated_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wrote dedup file"
        );
        Ok(summary)
    }
}

/// Build a dedup file for the last of `sources` with the default mmap opener.
pub fn build_dedup_file(
    sources: &[PathBuf],
    output: &Path,
    config: &BuildConfig,
) -> Result<BuildSummary> {
    DedupBuilder::new(config.clone()).build(sources, output)
}

fn output_dir(output: &Path) -> Result<PathBuf> {
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(fs::canonicalize(parent)?)
}

/// `path` relative to `base` when it lives below it, otherwise unchanged.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Path of the scratch file the output is staged in.
fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dedup".into());
    output.with_file_name(format!(".{name}.{}.partial", std::process::id()))
}

fn write_atomically(output: &Path, index: &DedupIndex) -> Result<()> {
    let staging = staging_path(output);
    let written = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&staging)?);
        write_index(&mut writer, index)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    })();

    let result = written.and_then(|()| fs::rename(&staging, output).map_err(Error::from));
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}
