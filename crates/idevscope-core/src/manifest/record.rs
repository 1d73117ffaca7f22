//! Manifest record decoding
//!
//! Each record is laid out contiguously after the 6-byte header:
//! - domain, filename, link target, data hash and a legacy encryption key as
//!   u16-prefixed strings (`0xFFFF` marks an absent field)
//! - mode (u16), a legacy inode number (u64), uid, gid, mtime, atime,
//!   ctime (u32 each), file length (u64)
//! - flag (u8), property count (u8), then name/value string pairs

use serde::{Deserialize, Serialize};

use super::reader::ManifestReader;
use crate::error::{CatalogError, Result};

/// Bytes taken by the two length prefixes of an empty property pair
const MIN_PROPERTY_LEN: usize = 4;

/// Raw decode output for one manifest record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Ordinal of the record in the manifest
    pub index: usize,
    /// Absolute byte offset of the record start
    pub offset: u64,
    pub domain: String,
    pub filename: String,
    pub linktarget: Option<String>,
    pub datahash: Option<Vec<u8>>,
    pub mode: u16,
    pub userid: u32,
    pub groupid: u32,
    pub mtime: u32,
    pub atime: u32,
    pub ctime: u32,
    pub filelen: u64,
    pub flag: u8,
    pub properties: Vec<(String, Vec<u8>)>,
}

impl FileRecord {
    /// Store a property; a repeated name overwrites the earlier value
    pub fn set_property(&mut self, name: String, value: Vec<u8>) {
        match self.properties.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
    }

    pub fn property(&self, name: &str) -> Option<&[u8]> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// Decodes consecutive records from a [`ManifestReader`]
pub struct RecordDecoder<'r, 'a> {
    reader: &'r mut ManifestReader<'a>,
    next_index: usize,
    lossy_names: usize,
}

impl<'r, 'a> RecordDecoder<'r, 'a> {
    /// The reader must already be positioned past the header
    pub fn new(reader: &'r mut ManifestReader<'a>) -> Self {
        Self {
            reader,
            next_index: 0,
            lossy_names: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        !self.reader.is_at_end()
    }

    pub fn offset(&self) -> u64 {
        self.reader.offset()
    }

    pub fn records_decoded(&self) -> usize {
        self.next_index
    }

    /// Names that were not valid UTF-8 and were decoded lossily
    pub fn lossy_names(&self) -> usize {
        self.lossy_names
    }

    /// Decode the record at the cursor and advance past it
    pub fn decode_next(&mut self) -> Result<FileRecord> {
        let index = self.next_index;
        let offset = self.reader.offset();
        self.reader.begin_record(index);

        let domain = self.read_text()?.unwrap_or_default();
        let filename = self.read_text()?.unwrap_or_default();
        let linktarget = self.read_text()?;
        let datahash = self.reader.read_string()?.map(<[u8]>::to_vec);
        // Encryption key, only meaningful to the device
        let _ = self.reader.read_string()?;

        let mode = self.reader.read_u16_be()?;
        // Inode number
        self.reader.skip(8)?;
        let userid = self.reader.read_u32_be()?;
        let groupid = self.reader.read_u32_be()?;
        let mtime = self.reader.read_u32_be()?;
        let atime = self.reader.read_u32_be()?;
        let ctime = self.reader.read_u32_be()?;
        let filelen = self.reader.read_u64_be()?;
        let flag = self.reader.read_u8()?;

        let count_offset = self.reader.offset();
        let property_count = self.reader.read_u8()? as usize;
        if property_count * MIN_PROPERTY_LEN > self.reader.remaining() {
            return Err(CatalogError::CorruptRecord {
                offset: count_offset,
                record: Some(index),
                reason: format!(
                    "{} properties cannot fit in {} remaining bytes",
                    property_count,
                    self.reader.remaining()
                ),
            });
        }

        let mut record = FileRecord {
            index,
            offset,
            domain,
            filename,
            linktarget,
            datahash,
            mode,
            userid,
            groupid,
            mtime,
            atime,
            ctime,
            filelen,
            flag,
            properties: Vec::with_capacity(property_count),
        };

        for _ in 0..property_count {
            let name = self.read_text()?.unwrap_or_default();
            let value = self
                .reader
                .read_string()?
                .map(<[u8]>::to_vec)
                .unwrap_or_default();
            record.set_property(name, value);
        }

        self.next_index += 1;
        tracing::debug!(
            "Decoded record {} at offset {}: {}-{}",
            index,
            offset,
            record.domain,
            record.filename
        );
        Ok(record)
    }

    fn read_text(&mut self) -> Result<Option<String>> {
        let offset = self.reader.offset();
        let Some(bytes) = self.reader.read_string()? else {
            return Ok(None);
        };

        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(Some(text.to_string())),
            Err(_) => {
                self.lossy_names += 1;
                tracing::warn!(
                    "Non UTF-8 string at offset {} in record {}, decoding lossily",
                    offset,
                    self.next_index
                );
                Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encodes records in the manifest layout for tests
    #[derive(Default)]
    pub(crate) struct RecordBytes {
        pub buf: Vec<u8>,
    }

    impl RecordBytes {
        pub fn string(&mut self, value: Option<&[u8]>) -> &mut Self {
            match value {
                Some(bytes) => {
                    self.buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    self.buf.extend_from_slice(bytes);
                }
                None => self.buf.extend_from_slice(&[0xFF, 0xFF]),
            }
            self
        }

        pub fn record(
            &mut self,
            domain: &str,
            filename: &str,
            mode: u16,
            filelen: u64,
            properties: &[(&str, &[u8])],
        ) -> &mut Self {
            self.string(Some(domain.as_bytes()))
                .string(Some(filename.as_bytes()))
                .string(None)
                .string(None)
                .string(None);
            self.buf.extend_from_slice(&mode.to_be_bytes());
            self.buf.extend_from_slice(&0u64.to_be_bytes());
            self.buf.extend_from_slice(&501u32.to_be_bytes());
            self.buf.extend_from_slice(&501u32.to_be_bytes());
            self.buf.extend_from_slice(&1_300_000_000u32.to_be_bytes());
            self.buf.extend_from_slice(&1_300_000_100u32.to_be_bytes());
            self.buf.extend_from_slice(&1_300_000_200u32.to_be_bytes());
            self.buf.extend_from_slice(&filelen.to_be_bytes());
            self.buf.push(4);
            self.buf.push(properties.len() as u8);
            for (name, value) in properties {
                self.string(Some(name.as_bytes())).string(Some(value));
            }
            self
        }
    }

    #[test]
    fn test_decode_single_record() {
        let mut bytes = RecordBytes::default();
        bytes.record(
            "HomeDomain",
            "Library/SMS/sms.db",
            0x81B4,
            4096,
            &[("com.apple.attr", &[0xCA, 0xFE][..])],
        );

        let mut reader = ManifestReader::new(&bytes.buf);
        let mut decoder = RecordDecoder::new(&mut reader);
        let record = decoder.decode_next().unwrap();

        assert_eq!(record.index, 0);
        assert_eq!(record.offset, 0);
        assert_eq!(record.domain, "HomeDomain");
        assert_eq!(record.filename, "Library/SMS/sms.db");
        assert_eq!(record.linktarget, None);
        assert_eq!(record.datahash, None);
        assert_eq!(record.mode, 0x81B4);
        assert_eq!(record.userid, 501);
        assert_eq!(record.mtime, 1_300_000_000);
        assert_eq!(record.ctime, 1_300_000_200);
        assert_eq!(record.filelen, 4096);
        assert_eq!(record.flag, 4);
        assert_eq!(record.property("com.apple.attr"), Some(&[0xCA, 0xFE][..]));
        assert!(!decoder.has_more());
    }

    #[test]
    fn test_link_target_and_hash() {
        let mut bytes = RecordBytes::default();
        bytes
            .string(Some(b"HomeDomain"))
            .string(Some(b"Library/link"))
            .string(Some(b"/var/mobile"))
            .string(Some(&[0x01, 0x02, 0x03]))
            .string(Some(b"key"));
        bytes.buf.extend_from_slice(&0xA1EDu16.to_be_bytes());
        bytes.buf.extend_from_slice(&[0u8; 8 + 4 * 5 + 8]);
        bytes.buf.extend_from_slice(&[0, 0]);

        let mut reader = ManifestReader::new(&bytes.buf);
        let record = RecordDecoder::new(&mut reader).decode_next().unwrap();
        assert_eq!(record.linktarget.as_deref(), Some("/var/mobile"));
        assert_eq!(record.datahash, Some(vec![1, 2, 3]));
        assert_eq!(record.mode, 0xA1ED);
    }

    #[test]
    fn test_duplicate_property_last_write_wins() {
        let mut bytes = RecordBytes::default();
        bytes.record(
            "HomeDomain",
            "a",
            0x81A4,
            0,
            &[("k", &b"one"[..]), ("other", &b"x"[..]), ("k", &b"two"[..])],
        );

        let mut reader = ManifestReader::new(&bytes.buf);
        let record = RecordDecoder::new(&mut reader).decode_next().unwrap();
        assert_eq!(record.properties.len(), 2);
        assert_eq!(record.property("k"), Some(&b"two"[..]));
    }

    #[test]
    fn test_consecutive_records_track_index_and_offset() {
        let mut bytes = RecordBytes::default();
        bytes.record("HomeDomain", "a", 0x41ED, 0, &[]);
        let second_offset = bytes.buf.len() as u64;
        bytes.record("HomeDomain", "a/b", 0x81A4, 1, &[]);

        let mut reader = ManifestReader::new(&bytes.buf);
        let mut decoder = RecordDecoder::new(&mut reader);
        decoder.decode_next().unwrap();
        let second = decoder.decode_next().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.offset, second_offset);
        assert_eq!(decoder.records_decoded(), 2);
    }

    #[test]
    fn test_truncated_mid_field() {
        let mut bytes = RecordBytes::default();
        bytes.record("HomeDomain", "Library", 0x41FD, 0, &[]);
        // Cut inside the file length field
        let cut = bytes.buf.len() - 5;
        bytes.buf.truncate(cut);

        let mut reader = ManifestReader::new(&bytes.buf);
        let result = RecordDecoder::new(&mut reader).decode_next();
        assert!(matches!(
            result,
            Err(CatalogError::TruncatedInput {
                record: Some(0),
                needed: 8,
                ..
            })
        ));
    }

    #[test]
    fn test_property_count_exceeding_buffer_is_corrupt() {
        let mut bytes = RecordBytes::default();
        bytes.record("HomeDomain", "a", 0x81A4, 0, &[]);
        let last = bytes.buf.len() - 1;
        bytes.buf[last] = 200;

        let mut reader = ManifestReader::new(&bytes.buf);
        let result = RecordDecoder::new(&mut reader).decode_next();
        assert!(matches!(
            result,
            Err(CatalogError::CorruptRecord {
                record: Some(0),
                ..
            })
        ));
    }

    #[test]
    fn test_non_utf8_name_is_lossy() {
        let mut bytes = RecordBytes::default();
        bytes
            .string(Some(b"HomeDomain"))
            .string(Some(&[b'a', 0xFF, b'b']))
            .string(None)
            .string(None)
            .string(None);
        bytes.buf.extend_from_slice(&0x81A4u16.to_be_bytes());
        bytes.buf.extend_from_slice(&[0u8; 8 + 4 * 5 + 8]);
        bytes.buf.extend_from_slice(&[0, 0]);

        let mut reader = ManifestReader::new(&bytes.buf);
        let mut decoder = RecordDecoder::new(&mut reader);
        let record = decoder.decode_next().unwrap();
        assert_eq!(record.filename, "a\u{FFFD}b");
        assert_eq!(decoder.lossy_names(), 1);
    }
}
