/// Legacy side table mapping manifest record offsets to file ids
use std::collections::HashMap;

use super::reader::{ManifestReader, MBDB_HEADER_LEN};
use crate::error::{CatalogError, Result};
use crate::index::hex_string;

/// Side table magic number at offset 0
pub const MBDX_MAGIC: &[u8; 4] = b"mbdx";

/// Raw file id length in each side table record
const FILE_ID_LEN: usize = 20;

/// File id, manifest offset (u32) and mode (u16)
const MBDX_RECORD_LEN: usize = FILE_ID_LEN + 4 + 2;

/// Offset to file id table built from a `Manifest.mbdx` file.
///
/// Offsets stored on disk are relative to the end of the manifest header;
/// the table keys are absolute record offsets so they compare directly with
/// [`super::record::FileRecord::offset`].
#[derive(Debug, Clone, Default)]
pub struct SideTable {
    version: u16,
    declared_count: u32,
    ids: HashMap<u64, String>,
}

impl SideTable {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ManifestReader::new(data);
        let version = reader.expect_magic(MBDX_MAGIC)?;
        let declared_count = reader.read_u32_be()?;

        let mut ids = HashMap::with_capacity(declared_count as usize);
        let mut index = 0usize;
        while !reader.is_at_end() {
            reader.begin_record(index);
            let record_offset = reader.offset();
            if reader.remaining() < MBDX_RECORD_LEN {
                return Err(CatalogError::TruncatedInput {
                    offset: record_offset,
                    record: Some(index),
                    needed: MBDX_RECORD_LEN,
                    remaining: reader.remaining(),
                });
            }

            let raw_id = reader.read_fixed(FILE_ID_LEN)?;
            let manifest_offset = reader.read_u32_be()? as u64 + MBDB_HEADER_LEN as u64;
            let _mode = reader.read_u16_be()?;

            let file_id = hex_string(raw_id);
            if let Some(previous) = ids.insert(manifest_offset, file_id) {
                tracing::warn!(
                    "Side table lists offset {} twice, replacing file id {}",
                    manifest_offset,
                    previous
                );
            }
            index += 1;
        }

        if index != declared_count as usize {
            tracing::warn!(
                "Side table declares {} records but contains {}",
                declared_count,
                index
            );
        }

        tracing::debug!("Parsed side table v{:#06x} with {} entries", version, ids.len());
        Ok(Self {
            version,
            declared_count,
            ids,
        })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn declared_count(&self) -> u32 {
        self.declared_count
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// File id for the record starting at an absolute manifest offset
    pub fn lookup(&self, record_offset: u64) -> Option<&str> {
        self.ids.get(&record_offset).map(String::as_str)
    }

    pub fn insert(&mut self, record_offset: u64, file_id: impl Into<String>) {
        self.ids.insert(record_offset, file_id.into());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build side table bytes from (relative offset, id byte) pairs
    pub(crate) fn side_table_bytes(entries: &[(u32, u8)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"mbdx\x02\x00");
        buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (offset, id_byte) in entries {
            buf.extend_from_slice(&[*id_byte; FILE_ID_LEN]);
            buf.extend_from_slice(&offset.to_be_bytes());
            buf.extend_from_slice(&0x81A4u16.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_parse_side_table() {
        let data = side_table_bytes(&[(0, 0xAB), (120, 0x01)]);
        let table = SideTable::parse(&data).unwrap();

        assert_eq!(table.version(), 0x0200);
        assert_eq!(table.declared_count(), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(6), Some("ab".repeat(20).as_str()));
        assert_eq!(table.lookup(126), Some("01".repeat(20).as_str()));
        assert_eq!(table.lookup(0), None);
    }

    #[test]
    fn test_wrong_magic() {
        let mut data = side_table_bytes(&[]);
        data[3] = b'b';
        assert!(matches!(
            SideTable::parse(&data),
            Err(CatalogError::Format { .. })
        ));
    }

    #[test]
    fn test_partial_record_is_truncated() {
        let mut data = side_table_bytes(&[(0, 0xAB)]);
        data.truncate(data.len() - 3);
        assert!(matches!(
            SideTable::parse(&data),
            Err(CatalogError::TruncatedInput {
                record: Some(0),
                ..
            })
        ));
    }
}
