/// Normalized catalog rows derived from manifest records
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::manifest::FileRecord;

/// File type bits of the mode field
const TYPE_MASK: u16 = 0xE000;
const TYPE_SYMLINK: u16 = 0xA000;
const TYPE_FILE: u16 = 0x8000;
const TYPE_DIRECTORY: u16 = 0x4000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

impl EntryType {
    /// Decode the type bits of a mode value
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & TYPE_MASK {
            TYPE_SYMLINK => Some(EntryType::Symlink),
            TYPE_FILE => Some(EntryType::File),
            TYPE_DIRECTORY => Some(EntryType::Directory),
            _ => None,
        }
    }

    /// Single character used in listings (`-`, `d`, `l`)
    pub fn as_char(&self) -> char {
        match self {
            EntryType::File => '-',
            EntryType::Directory => 'd',
            EntryType::Symlink => 'l',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '-' => Some(EntryType::File),
            'd' => Some(EntryType::Directory),
            'l' => Some(EntryType::Symlink),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::File => write!(f, "file"),
            EntryType::Directory => write!(f, "directory"),
            EntryType::Symlink => write!(f, "symlink"),
        }
    }
}

/// `rwxrwxrwx` rendering of the low 9 mode bits
pub fn permission_string(mode: u16) -> String {
    const FLAGS: [char; 3] = ['r', 'w', 'x'];
    (0..9)
        .map(|i| {
            if mode & (1 << (8 - i)) != 0 {
                FLAGS[i % 3]
            } else {
                '-'
            }
        })
        .collect()
}

/// Split a manifest domain on its first `-` into (domain type, domain)
pub fn split_domain(domain: &str) -> (&str, &str) {
    domain.split_once('-').unwrap_or((domain, ""))
}

/// Split a manifest filename on its last `/` into (path, name)
pub fn split_path(filename: &str) -> (&str, &str) {
    filename.rsplit_once('/').unwrap_or(("", filename))
}

/// Lowercase hex rendering of raw bytes
pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// One row of the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: u64,
    pub entry_type: EntryType,
    pub permissions: String,
    pub userid: String,
    pub groupid: String,
    pub filelen: u64,
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
    pub fileid: String,
    pub domain_type: String,
    pub domain: String,
    pub file_path: String,
    pub file_name: String,
    pub link_target: String,
    pub datahash: String,
    pub flag: u8,
}

impl IndexEntry {
    /// Normalize a decoded record.
    ///
    /// Fails with a format error when the mode carries an unsupported entry
    /// kind.
    pub fn from_record(id: u64, record: &FileRecord, fileid: String) -> Result<Self> {
        let entry_type =
            EntryType::from_mode(record.mode).ok_or_else(|| CatalogError::Format {
                offset: record.offset,
                record: Some(record.index),
                reason: format!(
                    "unsupported entry kind {:#06x} in mode {:#06x} for {}-{}",
                    record.mode & TYPE_MASK,
                    record.mode,
                    record.domain,
                    record.filename
                ),
            })?;

        let (domain_type, domain) = split_domain(&record.domain);
        let (file_path, file_name) = match entry_type {
            EntryType::Directory => (record.filename.as_str(), ""),
            _ => split_path(&record.filename),
        };

        Ok(Self {
            id,
            entry_type,
            permissions: permission_string(record.mode & 0x0FFF),
            userid: format!("{:08x}", record.userid),
            groupid: format!("{:08x}", record.groupid),
            filelen: record.filelen,
            mtime: record.mtime as i64,
            atime: record.atime as i64,
            ctime: record.ctime as i64,
            fileid,
            domain_type: domain_type.to_string(),
            domain: domain.to_string(),
            file_path: file_path.to_string(),
            file_name: file_name.to_string(),
            link_target: record.linktarget.clone().unwrap_or_default(),
            datahash: record.datahash.as_deref().map(hex_string).unwrap_or_default(),
            flag: record.flag,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// Path relative to the domain, as it appeared in the manifest
    pub fn full_path(&self) -> String {
        if self.file_name.is_empty() {
            self.file_path.clone()
        } else if self.file_path.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.file_path, self.file_name)
        }
    }

    /// Domain string as it appeared in the manifest
    pub fn full_domain(&self) -> String {
        if self.domain.is_empty() {
            self.domain_type.clone()
        } else {
            format!("{}-{}", self.domain_type, self.domain)
        }
    }

    pub fn mtime_utc(&self) -> Option<DateTime<Utc>> {
        timestamp(self.mtime)
    }

    pub fn atime_utc(&self) -> Option<DateTime<Utc>> {
        timestamp(self.atime)
    }

    pub fn ctime_utc(&self) -> Option<DateTime<Utc>> {
        timestamp(self.ctime)
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// One extended property of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub file_id: u64,
    pub property_name: String,
    pub property_val: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(domain: &str, filename: &str, mode: u16) -> FileRecord {
        FileRecord {
            index: 2,
            offset: 64,
            domain: domain.to_string(),
            filename: filename.to_string(),
            linktarget: None,
            datahash: Some(vec![0xDE, 0xAD]),
            mode,
            userid: 501,
            groupid: 0x1F5,
            mtime: 1_300_000_000,
            atime: 0,
            ctime: 0,
            filelen: 12,
            flag: 0,
            properties: Vec::new(),
        }
    }

    #[test]
    fn test_split_domain() {
        assert_eq!(split_domain("HomeDomain"), ("HomeDomain", ""));
        assert_eq!(
            split_domain("AppDomain-com.example.app"),
            ("AppDomain", "com.example.app")
        );
        assert_eq!(split_domain("AppDomain-com.a-b"), ("AppDomain", "com.a-b"));
        assert_eq!(split_domain(""), ("", ""));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("Library/SMS/sms.db"), ("Library/SMS", "sms.db"));
        assert_eq!(split_path("top.plist"), ("", "top.plist"));
    }

    #[test]
    fn test_permission_strings_for_all_types() {
        for type_bits in [TYPE_FILE, TYPE_DIRECTORY, TYPE_SYMLINK] {
            for perm in 0..=0o777u16 {
                let mode = type_bits | perm;
                assert!(EntryType::from_mode(mode).is_some());
                let text = permission_string(mode & 0x0FFF);
                assert_eq!(text.len(), 9);
                assert!(text.chars().all(|c| matches!(c, 'r' | 'w' | 'x' | '-')));
                assert_eq!(text, permission_string(mode & 0x0FFF));
            }
        }
    }

    #[test]
    fn test_permission_values() {
        assert_eq!(permission_string(0o644), "rw-r--r--");
        assert_eq!(permission_string(0o755), "rwxr-xr-x");
        assert_eq!(permission_string(0o000), "---------");
        // setuid/setgid/sticky are not displayed
        assert_eq!(permission_string(0o7777 & 0x0FFF), "rwxrwxrwx");
    }

    #[test]
    fn test_from_record_file() {
        let entry =
            IndexEntry::from_record(1, &record("HomeDomain", "Library/SMS/sms.db", 0x81A4), "f".into())
                .unwrap();
        assert_eq!(entry.entry_type, EntryType::File);
        assert_eq!(entry.permissions, "rw-r--r--");
        assert_eq!(entry.userid, "000001f5");
        assert_eq!(entry.groupid, "000001f5");
        assert_eq!(entry.domain_type, "HomeDomain");
        assert_eq!(entry.domain, "");
        assert_eq!(entry.file_path, "Library/SMS");
        assert_eq!(entry.file_name, "sms.db");
        assert_eq!(entry.datahash, "dead");
        assert_eq!(entry.link_target, "");
        assert_eq!(entry.full_path(), "Library/SMS/sms.db");
        assert_eq!(entry.full_domain(), "HomeDomain");
        assert_eq!(entry.mtime_utc().unwrap().timestamp(), 1_300_000_000);
    }

    #[test]
    fn test_from_record_directory_keeps_full_path() {
        let entry = IndexEntry::from_record(
            1,
            &record("AppDomain-com.example.app", "Library/Caches", 0x41ED),
            "d".into(),
        )
        .unwrap();
        assert!(entry.is_directory());
        assert_eq!(entry.file_path, "Library/Caches");
        assert_eq!(entry.file_name, "");
        assert_eq!(entry.full_path(), "Library/Caches");
        assert_eq!(entry.full_domain(), "AppDomain-com.example.app");
    }

    #[test]
    fn test_unsupported_kind_is_format_error() {
        // FIFO
        let result = IndexEntry::from_record(1, &record("HomeDomain", "pipe", 0x11A4), "x".into());
        match result {
            Err(CatalogError::Format { offset, record, .. }) => {
                assert_eq!(offset, 64);
                assert_eq!(record, Some(2));
            }
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_entry_type_chars() {
        for t in [EntryType::File, EntryType::Directory, EntryType::Symlink] {
            assert_eq!(EntryType::from_char(t.as_char()), Some(t));
        }
    }
}
