use super::Reader;
use std::io::{self, Read, Seek, SeekFrom};

/// Sequential `Read + Seek` view of a [`Reader`], for APIs that expect a
/// stream. Each cursor keeps its own position.
pub struct ReaderCursor<'a> {
    reader: &'a Reader,
    pos: u64,
}

impl<'a> ReaderCursor<'a> {
    pub(crate) fn new(reader: &'a Reader) -> Self {
        Self { reader, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for ReaderCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ReaderCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.reader.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
