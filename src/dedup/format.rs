//! On-disk layout of a dedup file. All integers are little endian.
//!
//! ```text
//! header (48 bytes)
//!   magic               8  "MKVDEDUP"
//!   version             u32
//!   flags               u32  bit 0: entry fingerprints present
//!   logical_size        u64
//!   entry_count         u64
//!   source_count        u32
//!   reserved            u32
//!   entry_table_offset  u64
//! entry table (40 bytes per entry, sorted by logical_offset)
//!   logical_offset u64, length u64, source_id u32, reserved u32,
//!   source_offset u64, fingerprint u64
//! source table (source_count records, ordered by id)
//!   id u32, size u64, fingerprint u64, path_len u32, path (UTF-8)
//! ```

use super::types::{DedupIndex, Entry, SourceInfo};
use crate::error::{Error, Result};
use crate::utils::{write_u32_le, write_u64_le, SliceReader};
use std::io::Write;
use std::path::PathBuf;

pub const MAGIC: &[u8; 8] = b"MKVDEDUP";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 48;

pub const FLAG_FINGERPRINTS: u32 = 1;

/// Parsed fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub flags: u32,
    pub logical_size: u64,
    pub entry_count: u64,
    pub source_count: u32,
    pub entry_table_offset: u64,
}

impl Header {
    pub fn has_fingerprints(&self) -> bool {
        self.flags & FLAG_FINGERPRINTS != 0
    }
}

/// Serialize `index` into `out`.
pub fn write_index<W: Write>(out: &mut W, index: &DedupIndex) -> Result<()> {
    out.write_all(MAGIC)?;
    write_u32_le(out, VERSION)?;
    write_u32_le(out, FLAG_FINGERPRINTS)?;
    write_u64_le(out, index.logical_size())?;
    write_u64_le(out, index.entries().len() as u64)?;
    write_u32_le(out, index.sources().len() as u32)?;
    write_u32_le(out, 0)?;
    write_u64_le(out, HEADER_SIZE as u64)?;

    for entry in index.entries() {
        write_u64_le(out, entry.logical_offset)?;
        write_u64_le(out, entry.length)?;
        write_u32_le(out, entry.source_id)?;
        write_u32_le(out, 0)?;
        write_u64_le(out, entry.source_offset)?;
        write_u64_le(out, entry.fingerprint)?;
    }

    for source in index.sources() {
        let path = source.path.to_string_lossy();
        let bytes = path.as_bytes();
        write_u32_le(out, source.id)?;
        write_u64_le(out, source.size)?;
        write_u64_le(out, source.fingerprint)?;
        write_u32_le(out, bytes.len() as u32)?;
        out.write_all(bytes)?;
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidIndex(reason.into())
}

/// Parse and validate the header.
pub fn read_header(buf: &[u8]) -> Result<Header> {
    let mut r = SliceReader::new(buf);
    let magic = r.bytes(MAGIC.len()).ok_or_else(|| invalid("file shorter than its header"))?;
    if magic != MAGIC {
        return Err(invalid("bad magic"));
    }
    let truncated = || invalid("file shorter than its header");
    let version = r.u32().ok_or_else(truncated)?;
    if version != VERSION {
        return Err(invalid(format!("unsupported version {version}")));
    }
    let flags = r.u32().ok_or_else(truncated)?;
    let logical_size = r.u64().ok_or_else(truncated)?;
    let entry_count = r.u64().ok_or_else(truncated)?;
    let source_count = r.u32().ok_or_else(truncated)?;
    let _reserved = r.u32().ok_or_else(truncated)?;
    let entry_table_offset = r.u64().ok_or_else(truncated)?;

    if entry_table_offset < HEADER_SIZE as u64 {
        return Err(invalid("entry table overlaps the header"));
    }
    Ok(Header {
        version,
        flags,
        logical_size,
        entry_count,
        source_count,
        entry_table_offset,
    })
}

/// Parse a whole dedup file and check every index invariant.
pub fn read_index(buf: &[u8]) -> Result<(Header, DedupIndex)> {
    let header = read_header(buf)?;

    let table_start = usize::try_from(header.entry_table_offset)
        .map_err(|_| invalid("entry table offset out of range"))?;
    let table_len = usize::try_from(header.entry_count)
        .ok()
        .and_then(|n| n.checked_mul(Entry::SIZE))
        .ok_or_else(|| invalid("entry count out of range"))?;
    if table_start
        .checked_add(table_len)
        .is_none_or(|end| end > buf.len())
    {
        return Err(invalid(format!(
            "entry table of {} entries is truncated",
            header.entry_count
        )));
    }

    let mut r = SliceReader::at(buf, table_start);
    let truncated_entry = || invalid("truncated entry");
    let mut entries = Vec::with_capacity(header.entry_count as usize);
    for _ in 0..header.entry_count {
        let logical_offset = r.u64().ok_or_else(truncated_entry)?;
        let length = r.u64().ok_or_else(truncated_entry)?;
        let source_id = r.u32().ok_or_else(truncated_entry)?;
        let _reserved = r.u32().ok_or_else(truncated_entry)?;
        let source_offset = r.u64().ok_or_else(truncated_entry)?;
        let fingerprint = r.u64().ok_or_else(truncated_entry)?;
        entries.push(Entry {
            logical_offset,
            length,
            source_id,
            source_offset,
            fingerprint,
        });
    }

    let truncated_source = || invalid("truncated source table");
    let mut sources = Vec::new();
    for _ in 0..header.source_count {
        let id = r.u32().ok_or_else(truncated_source)?;
        let size = r.u64().ok_or_else(truncated_source)?;
        let fingerprint = r.u64().ok_or_else(truncated_source)?;
        let path_len = r.u32().ok_or_else(truncated_source)?;
        let path = r.bytes(path_len as usize).ok_or_else(truncated_source)?;
        let path = std::str::from_utf8(path)
            .map_err(|_| invalid(format!("path of source {id} is not UTF-8")))?;
        sources.push(SourceInfo {
            id,
            path: PathBuf::from(path),
            size,
            fingerprint,
        });
    }
    if r.remaining() != 0 {
        return Err(invalid(format!("{} trailing bytes", r.remaining())));
    }

    let index = DedupIndex::new(header.logical_size, entries, sources)?;
    Ok((header, index))
}
