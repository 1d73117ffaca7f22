//! Helpers for writing synthetic backup directories

#![allow(dead_code)]

use std::path::Path;

/// One record to encode into a manifest
pub struct TestRecord<'a> {
    pub domain: &'a str,
    pub filename: &'a str,
    pub mode: u16,
    pub filelen: u64,
    pub linktarget: Option<&'a str>,
    pub datahash: Option<Vec<u8>>,
    pub properties: Vec<(&'a str, Vec<u8>)>,
}

impl<'a> TestRecord<'a> {
    pub fn new(domain: &'a str, filename: &'a str, mode: u16) -> Self {
        Self {
            domain,
            filename,
            mode,
            filelen: 0,
            linktarget: None,
            datahash: None,
            properties: Vec::new(),
        }
    }

    pub fn filelen(mut self, filelen: u64) -> Self {
        self.filelen = filelen;
        self
    }

    pub fn link(mut self, target: &'a str) -> Self {
        self.linktarget = Some(target);
        self
    }

    pub fn hash(mut self, hash: Vec<u8>) -> Self {
        self.datahash = Some(hash);
        self
    }

    pub fn property(mut self, name: &'a str, value: &[u8]) -> Self {
        self.properties.push((name, value.to_vec()));
        self
    }
}

/// Encodes records in the Manifest.mbdb layout
pub struct ManifestBuilder {
    pub buf: Vec<u8>,
    pub offsets: Vec<u64>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            buf: b"mbdb\x05\x00".to_vec(),
            offsets: Vec::new(),
        }
    }

    fn string(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => {
                self.buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                self.buf.extend_from_slice(bytes);
            }
            None => self.buf.extend_from_slice(&[0xFF, 0xFF]),
        }
    }

    pub fn push(&mut self, record: TestRecord) -> &mut Self {
        self.offsets.push(self.buf.len() as u64);
        self.string(Some(record.domain.as_bytes()));
        self.string(Some(record.filename.as_bytes()));
        self.string(record.linktarget.map(str::as_bytes));
        self.string(record.datahash.as_deref());
        self.string(None);
        self.buf.extend_from_slice(&record.mode.to_be_bytes());
        self.buf.extend_from_slice(&42u64.to_be_bytes());
        self.buf.extend_from_slice(&501u32.to_be_bytes());
        self.buf.extend_from_slice(&501u32.to_be_bytes());
        self.buf.extend_from_slice(&1_300_000_000u32.to_be_bytes());
        self.buf.extend_from_slice(&1_300_000_000u32.to_be_bytes());
        self.buf.extend_from_slice(&1_300_000_000u32.to_be_bytes());
        self.buf.extend_from_slice(&record.filelen.to_be_bytes());
        self.buf.push(0);
        self.buf.push(record.properties.len() as u8);
        for (name, value) in &record.properties {
            self.string(Some(name.as_bytes()));
            self.string(Some(value));
        }
        self
    }

    pub fn write_to(&self, dir: &Path) {
        std::fs::write(dir.join("Manifest.mbdb"), &self.buf).unwrap();
    }
}

/// Encodes a Manifest.mbdx side table from (absolute record offset, file id)
pub fn write_side_table(dir: &Path, entries: &[(u64, [u8; 20])]) {
    let mut buf = b"mbdx\x02\x00".to_vec();
    buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for (offset, id) in entries {
        buf.extend_from_slice(id);
        buf.extend_from_slice(&((*offset - 6) as u32).to_be_bytes());
        buf.extend_from_slice(&0x81A4u16.to_be_bytes());
    }
    std::fs::write(dir.join("Manifest.mbdx"), buf).unwrap();
}
