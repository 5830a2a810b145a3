//! Minimal EBML writer.
//!
//! Produces structurally valid Matroska files from raw frame payloads. Used to
//! synthesise fixtures for tests, benchmarks and the fuzz corpus; it is not a
//! muxer.

use super::ids;
use super::vint::{encode_id, encode_size, encode_unknown_size};

/// Append-only EBML element writer.
#[derive(Debug, Default, Clone)]
pub struct ElementWriter {
    buf: Vec<u8>,
}

impl ElementWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a leaf element with raw content.
    pub fn element(&mut self, id: u32, payload: &[u8]) -> &mut Self {
        encode_id(id, &mut self.buf);
        encode_size(payload.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(payload);
        self
    }

    /// Write an unsigned-integer element using the fewest bytes.
    pub fn uint(&mut self, id: u32, value: u64) -> &mut Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
        self.element(id, &bytes[skip..])
    }

    /// Write a container element whose children are produced by `f`.
    pub fn master(&mut self, id: u32, f: impl FnOnce(&mut ElementWriter)) -> &mut Self {
        let mut inner = ElementWriter::new();
        f(&mut inner);
        self.element(id, &inner.buf)
    }

    /// Write a container element with the unknown-size sentinel, as live
    /// muxers do.
    pub fn unknown_master(&mut self, id: u32, f: impl FnOnce(&mut ElementWriter)) -> &mut Self {
        encode_id(id, &mut self.buf);
        encode_unknown_size(&mut self.buf);
        f(self);
        self
    }

    /// Write a SimpleBlock: track vint, signed 16-bit timecode, flags, frame.
    pub fn simple_block(&mut self, track: u8, timecode: i16, frame: &[u8]) -> &mut Self {
        let content = block_content(track, timecode, 0x80, frame);
        self.element(ids::SIMPLE_BLOCK, &content)
    }

    /// Write a BlockGroup holding a single Block.
    pub fn block_group(&mut self, track: u8, timecode: i16, frame: &[u8]) -> &mut Self {
        let content = block_content(track, timecode, 0x00, frame);
        self.master(ids::BLOCK_GROUP, |g| {
            g.element(ids::BLOCK, &content);
        })
    }

    /// Append bytes verbatim (used to inject corruption in tests).
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

fn block_content(track: u8, timecode: i16, flags: u8, frame: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(frame.len() + 4);
    encode_size(track as u64, &mut content);
    content.extend_from_slice(&timecode.to_be_bytes());
    content.push(flags);
    content.extend_from_slice(frame);
    content
}

/// Build a small but complete Matroska file: EBML header, Segment with Info,
/// Tracks, one Cluster per entry of `clusters`, and a trailing Cues element.
pub fn matroska_file(title: &str, clusters: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let mut w = ElementWriter::new();
    w.master(ids::EBML_HEADER, |h| {
        h.uint(0x4286, 1) // EBMLVersion
            .uint(0x42F7, 1) // EBMLReadVersion
            .element(0x4282, b"matroska") // DocType
            .uint(0x4287, 4); // DocTypeVersion
    });
    w.master(ids::SEGMENT, |s| {
        s.master(ids::INFO, |i| {
            i.uint(0x2AD7B1, 1_000_000) // TimecodeScale
                .element(0x7BA9, title.as_bytes()); // Title
        });
        s.master(ids::TRACKS, |t| {
            t.master(0xAE, |e| {
                e.uint(0xD7, 1).uint(0x83, 1).element(0x86, b"V_UNCOMPRESSED");
            });
        });
        for (n, frames) in clusters.iter().enumerate() {
            s.master(ids::CLUSTER, |c| {
                c.uint(ids::TIMECODE, n as u64 * 1000);
                for (i, frame) in frames.iter().enumerate() {
                    c.simple_block(1, (i as i16).wrapping_mul(40), frame);
                }
            });
        }
        s.master(ids::CUES, |c| {
            c.element(0xBB, &[0xB3, 0x81, 0x00]);
        });
    });
    w.into_inner()
}
