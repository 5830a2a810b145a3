//! EBML variable-length integers.
//!
//! The position of the first set bit in the first byte gives the total width
//! of the integer; the bits after that marker are the value. Element IDs keep
//! their marker bits, element sizes drop them.

use crate::error::{Error, Result};

/// Widest element ID the format allows (class D IDs).
pub const MAX_ID_WIDTH: usize = 4;

/// Widest element size the format allows.
pub const MAX_SIZE_WIDTH: usize = 8;

/// Declared length of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSize {
    Known(u64),
    /// All value bits set: the element runs until its parent ends (or until a
    /// sibling of a higher level appears, for clusters).
    Unknown,
}

impl ElementSize {
    pub fn known(self) -> Option<u64> {
        match self {
            ElementSize::Known(n) => Some(n),
            ElementSize::Unknown => None,
        }
    }
}

/// Total width of a vint from its first byte, `None` if the marker bit is
/// missing.
#[inline]
pub fn vint_width(first: u8) -> Option<usize> {
    if first == 0 {
        None
    } else {
        Some(first.leading_zeros() as usize + 1)
    }
}

/// Read an element ID at `pos`. Returns the ID (marker bits included) and its
/// encoded width.
pub fn read_id(buf: &[u8], pos: usize) -> Result<(u32, usize)> {
    let first = *buf
        .get(pos)
        .ok_or_else(|| Error::corrupt(pos as u64, "truncated element id"))?;
    let width = vint_width(first)
        .ok_or_else(|| Error::corrupt(pos as u64, "element id without marker bit"))?;
    if width > MAX_ID_WIDTH {
        return Err(Error::corrupt(pos as u64, "element id wider than 4 bytes"));
    }
    let bytes = buf
        .get(pos..pos + width)
        .ok_or_else(|| Error::corrupt(pos as u64, "truncated element id"))?;

    let mut id = 0u32;
    let mut value_bits_set = true;
    for (i, &b) in bytes.iter().enumerate() {
        id = (id << 8) | b as u32;
        let value_mask = if i == 0 { 0xFFu8 >> width } else { 0xFF };
        if b & value_mask != value_mask {
            value_bits_set = false;
        }
    }
    // All-ones IDs are reserved.
    if value_bits_set {
        return Err(Error::corrupt(pos as u64, "reserved element id"));
    }
    Ok((id, width))
}

/// Read an element size at `pos`. Returns the size and its encoded width.
pub fn read_size(buf: &[u8], pos: usize) -> Result<(ElementSize, usize)> {
    let first = *buf
        .get(pos)
        .ok_or_else(|| Error::corrupt(pos as u64, "truncated element size"))?;
    let width = vint_width(first)
        .ok_or_else(|| Error::corrupt(pos as u64, "element size without marker bit"))?;
    let bytes = buf
        .get(pos..pos + width)
        .ok_or_else(|| Error::corrupt(pos as u64, "truncated element size"))?;

    let mut value = (first as u64) & (0xFFu64 >> width);
    for &b in &bytes[1..] {
        value = (value << 8) | b as u64;
    }

    let unknown = (1u64 << (7 * width)) - 1;
    if value == unknown {
        Ok((ElementSize::Unknown, width))
    } else {
        Ok((ElementSize::Known(value), width))
    }
}

/// Read a plain vint value (marker dropped), as used for track numbers inside
/// block headers.
pub fn read_vint(buf: &[u8], pos: usize) -> Result<(u64, usize)> {
    match read_size(buf, pos)? {
        (ElementSize::Known(v), w) => Ok((v, w)),
        (ElementSize::Unknown, _) => Err(Error::corrupt(pos as u64, "reserved vint value")),
    }
}

/// Minimal number of bytes needed to encode `value` as a size vint.
pub fn size_width(value: u64) -> usize {
    (1..=MAX_SIZE_WIDTH)
        .find(|&w| value < (1u64 << (7 * w)) - 1)
        .unwrap_or(MAX_SIZE_WIDTH)
}

/// Append `value` as a minimal-width size vint.
pub fn encode_size(value: u64, out: &mut Vec<u8>) {
    let width = size_width(value);
    let marked = value | (1u64 << (7 * width));
    out.extend_from_slice(&marked.to_be_bytes()[8 - width..]);
}

/// Append the 8-byte unknown-size sentinel.
pub fn encode_unknown_size(out: &mut Vec<u8>) {
    out.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
}

/// Append an element ID (IDs are stored verbatim, marker included).
pub fn encode_id(id: u32, out: &mut Vec<u8>) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    out.extend_from_slice(&bytes[skip..]);
}
