/// Forward byte cursor over a raw manifest buffer
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::{CatalogError, Result};

/// Manifest magic number at offset 0
pub const MBDB_MAGIC: &[u8; 4] = b"mbdb";

/// Magic followed by a two byte format version
pub const MBDB_HEADER_LEN: usize = 6;

/// Length prefix marking an absent string field
const ABSENT_LENGTH: u16 = 0xFFFF;

/// Sequential reader with no backtracking beyond the current record.
///
/// Every error carries the absolute byte offset where the failing field
/// started and, once [`ManifestReader::begin_record`] has been called, the
/// ordinal of the record being decoded.
pub struct ManifestReader<'a> {
    cursor: Cursor<&'a [u8]>,
    record: Option<usize>,
}

impl<'a> ManifestReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            record: None,
        }
    }

    /// Absolute position of the cursor
    pub fn offset(&self) -> u64 {
        self.cursor.position()
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Tag subsequent errors with a record ordinal
    pub fn begin_record(&mut self, index: usize) {
        self.record = Some(index);
    }

    pub fn current_record(&self) -> Option<usize> {
        self.record
    }

    /// Check a magic signature at the cursor and return the format version
    /// that follows it.
    pub fn expect_magic(&mut self, magic: &[u8]) -> Result<u16> {
        let start = self.offset();
        if self.remaining() < magic.len() + 2 {
            return Err(CatalogError::Format {
                offset: start,
                record: None,
                reason: format!("input too short for a {} byte header", magic.len() + 2),
            });
        }

        let found = self.read_fixed(magic.len())?;
        if found != magic {
            return Err(CatalogError::Format {
                offset: start,
                record: None,
                reason: format!(
                    "bad magic {:02x?}, expected {:?}",
                    found,
                    String::from_utf8_lossy(magic)
                ),
            });
        }

        self.read_u16_be()
    }

    /// Verify the manifest header at offset 0 and return its version
    pub fn verify_header(&mut self) -> Result<u16> {
        if self.offset() != 0 {
            return Err(CatalogError::Format {
                offset: self.offset(),
                record: None,
                reason: "header must be read at offset 0".to_string(),
            });
        }
        self.expect_magic(MBDB_MAGIC)
    }

    /// Read exactly `n` bytes
    pub fn read_fixed(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        self.cursor.set_position((start + n) as u64);
        Ok(&data[start..start + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_fixed(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let offset = self.offset();
        self.cursor.read_u8().map_err(|_| self.truncated(offset, 1))
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let offset = self.offset();
        self.cursor
            .read_u16::<BigEndian>()
            .map_err(|_| self.truncated(offset, 2))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let offset = self.offset();
        self.cursor
            .read_u32::<BigEndian>()
            .map_err(|_| self.truncated(offset, 4))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let offset = self.offset();
        self.cursor
            .read_u64::<BigEndian>()
            .map_err(|_| self.truncated(offset, 8))
    }

    /// Read a string with a big-endian u16 length prefix.
    ///
    /// Returns `None` for the `0xFFFF` sentinel, which is distinct from a
    /// present zero-length string. A declared length that runs past the end
    /// of the buffer is a corrupt record, not a truncation: the prefix itself
    /// was read intact.
    pub fn read_string(&mut self) -> Result<Option<&'a [u8]>> {
        let prefix_offset = self.offset();
        let length = self.read_u16_be()?;
        if length == ABSENT_LENGTH {
            return Ok(None);
        }

        let length = length as usize;
        if length > self.remaining() {
            return Err(CatalogError::CorruptRecord {
                offset: prefix_offset,
                record: self.record,
                reason: format!(
                    "string length {} exceeds {} remaining bytes",
                    length,
                    self.remaining()
                ),
            });
        }

        self.read_fixed(length).map(Some)
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(self.truncated(self.offset(), n));
        }
        Ok(())
    }

    fn truncated(&self, offset: u64, needed: usize) -> CatalogError {
        let len = self.cursor.get_ref().len() as u64;
        CatalogError::TruncatedInput {
            offset,
            record: self.record,
            needed,
            remaining: len.saturating_sub(offset) as usize,
        }
    }
}
