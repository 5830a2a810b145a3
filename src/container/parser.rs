//! Lazy element iteration over an in-memory (usually memory-mapped) buffer.
//!
//! Offsets are absolute positions in the buffer handed to [`ElementIter`], so
//! every element reports where it lives in the source file.

use super::ids;
use super::vint::{read_id, read_size, ElementSize};
use crate::error::{Error, Result};

/// One parsed element header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub id: u32,
    pub size: ElementSize,
    /// Offset of the first ID byte
    pub header_start: u64,
    /// Offset of the first content byte
    pub data_start: u64,
    /// End of the content. For unknown-sized elements this is the enclosing
    /// bound.
    pub data_end: u64,
}

impl Element {
    #[inline]
    pub fn data_len(&self) -> u64 {
        self.data_end - self.data_start
    }

    #[inline]
    pub fn header_len(&self) -> u64 {
        self.data_start - self.header_start
    }

    pub fn is_unknown_size(&self) -> bool {
        self.size == ElementSize::Unknown
    }

    /// Content bytes of this element.
    pub fn data<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.data_start as usize..self.data_end as usize]
    }

    /// Iterate the children of a container element.
    ///
    /// For an unknown-sized cluster the iterator stops in front of the first
    /// segment-level ID; [`ElementIter::position`] then tells the caller where
    /// the cluster really ended.
    pub fn children<'a>(&self, buf: &'a [u8]) -> ElementIter<'a> {
        let iter = ElementIter::range(buf, self.data_start as usize, self.data_end as usize);
        if self.is_unknown_size() && self.id == ids::CLUSTER {
            iter.stop_at(ids::SEGMENT_LEVEL_IDS)
        } else {
            iter
        }
    }
}

/// Iterator over sibling elements within `[pos, end)`.
///
/// Yields `Err` at most once: after a corrupt element nothing at this level
/// can be trusted, so the iterator is exhausted afterwards.
#[derive(Debug, Clone)]
pub struct ElementIter<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
    stop_ids: &'static [u32],
    done: bool,
}

impl<'a> ElementIter<'a> {
    /// Iterate top-level elements of the whole buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::range(buf, 0, buf.len())
    }

    /// Iterate elements in `[start, end)`.
    pub fn range(buf: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(buf.len());
        Self {
            buf,
            pos: start.min(end),
            end,
            stop_ids: &[],
            done: false,
        }
    }

    /// End iteration (without consuming) when one of `ids` is encountered.
    pub fn stop_at(mut self, ids: &'static [u32]) -> Self {
        self.stop_ids = ids;
        self
    }

    /// Offset of the next element header.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Restart iteration at `pos`, e.g. after an unknown-sized child that
    /// ended early.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.end);
        self.done = false;
    }

    pub fn end(&self) -> usize {
        self.end
    }

    fn parse_next(&mut self) -> Result<Option<Element>> {
        let bounded = &self.buf[..self.end];
        let start = self.pos;

        let (id, id_len) = read_id(bounded, start)?;
        if self.stop_ids.contains(&id) {
            return Ok(None);
        }

        let (size, size_len) = read_size(bounded, start + id_len)?;
        let data_start = start + id_len + size_len;
        let data_end = match size {
            ElementSize::Known(len) => {
                let end = (data_start as u64)
                    .checked_add(len)
                    .ok_or_else(|| Error::corrupt(start as u64, "element size overflows"))?;
                if end > self.end as u64 {
                    return Err(Error::corrupt(
                        start as u64,
                        "element overruns its enclosing bound",
                    ));
                }
                end as usize
            }
            ElementSize::Unknown => self.end,
        };

        self.pos = data_end;
        Ok(Some(Element {
            id,
            size,
            header_start: start as u64,
            data_start: data_start as u64,
            data_end: data_end as u64,
        }))
    }
}

impl Iterator for ElementIter<'_> {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.end {
            return None;
        }
        match self.parse_next() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Find the first element with `id` among the children of `parent`.
pub fn find_child(buf: &[u8], parent: &Element, id: u32) -> Result<Option<Element>> {
    for child in parent.children(buf) {
        let child = child?;
        if child.id == id {
            return Ok(Some(child));
        }
    }
    Ok(None)
}

/// Read an unsigned-integer element's content (big endian, up to 8 bytes).
pub fn read_uint(buf: &[u8], element: &Element) -> Result<u64> {
    let data = element.data(buf);
    if data.len() > 8 {
        return Err(Error::corrupt(element.header_start, "unsigned integer wider than 8 bytes"));
    }
    Ok(data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}
