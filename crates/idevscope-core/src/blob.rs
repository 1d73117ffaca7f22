//! Read-only access to blob files named by resolved file ids
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{CatalogError, Result};
use crate::index::IndexEntry;

/// Bytes read for content sniffing
pub const HEADER_LEN: usize = 512;

/// Read up to [`HEADER_LEN`] bytes from the start of a blob
pub fn read_header(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| CatalogError::filesystem(path, e))?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| CatalogError::filesystem(path, e))?;
    Ok(header)
}

/// Detect a blob's content type from its first bytes
pub fn detect_content_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"SQLite format 3\0") {
        return Some("application/x-sqlite3");
    }
    if data.starts_with(b"bplist00") {
        return Some("application/x-bplist");
    }
    if data.starts_with(b"<?xml") {
        let head = String::from_utf8_lossy(&data[..data.len().min(HEADER_LEN)]);
        if head.contains("<!DOCTYPE plist") || head.contains("<plist") {
            return Some("application/x-plist");
        }
        return Some("text/xml");
    }

    if data.len() < 8 {
        return None;
    }

    match &data[0..4] {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47] => Some("image/png"),
        [0x47, 0x49, 0x46, 0x38] => Some("image/gif"),
        [0x4D, 0x4D, 0x00, 0x2A] | [0x49, 0x49, 0x2A, 0x00] => Some("image/tiff"),
        [0x25, 0x50, 0x44, 0x46] => Some("application/pdf"),
        [0x50, 0x4B, 0x03, 0x04] => Some("application/zip"),
        [0x23, 0x21, 0x41, 0x4D] => Some("audio/amr"), // "#!AM"
        _ if &data[4..8] == b"ftyp" => match &data[8..data.len().min(12)] {
            b"heic" | b"heix" | b"mif1" => Some("image/heic"),
            b"M4A " => Some("audio/mp4"),
            b"qt  " => Some("video/quicktime"),
            _ => Some("video/mp4"),
        },
        _ => None,
    }
}

/// Heuristic check for textual content
pub fn is_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }

    let checked = &data[..data.len().min(1024)];
    if std::str::from_utf8(checked).is_ok() {
        return true;
    }

    let printable = checked
        .iter()
        .filter(|&&b| (0x20..=0x7E).contains(&b) || b == b'\t' || b == b'\n' || b == b'\r')
        .count();
    printable as f32 / checked.len() as f32 > 0.8
}

/// Lowercase hex SHA-1 of a file's contents
pub fn sha1_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobStatus {
    /// Contents hash to the recorded data hash
    Verified,
    /// Contents differ from the recorded data hash
    Mismatch { actual: String },
    /// Blob present but the manifest recorded no SHA-1 sized hash
    NoHash,
    /// Blob file absent from the backup directory
    Missing,
    Unreadable(String),
}

/// Result of checking one blob against the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobCheck {
    pub entry_id: u64,
    pub path: PathBuf,
    pub expected: String,
    pub status: BlobStatus,
}

/// Compare a blob on disk with the data hash recorded in its entry.
///
/// Failures are per file and never affect the catalog.
pub fn check_blob(entry: &IndexEntry, path: &Path) -> BlobCheck {
    let status = if !path.exists() {
        BlobStatus::Missing
    } else if entry.datahash.len() != 40 {
        BlobStatus::NoHash
    } else {
        match sha1_file(path) {
            Ok(actual) if actual.eq_ignore_ascii_case(&entry.datahash) => BlobStatus::Verified,
            Ok(actual) => BlobStatus::Mismatch { actual },
            Err(e) => BlobStatus::Unreadable(e.to_string()),
        }
    };

    if !matches!(status, BlobStatus::Verified | BlobStatus::NoHash) {
        tracing::warn!("Blob for entry {} at {}: {:?}", entry.id, path.display(), status);
    }

    BlobCheck {
        entry_id: entry.id,
        path: path.to_path_buf(),
        expected: entry.datahash.clone(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::EntryType;
    use std::io::Write;
    use tempfile::TempDir;

    fn entry(datahash: &str) -> IndexEntry {
        IndexEntry {
            id: 7,
            entry_type: EntryType::File,
            permissions: "rw-r--r--".to_string(),
            userid: "000001f5".to_string(),
            groupid: "000001f5".to_string(),
            filelen: 9,
            mtime: 0,
            atime: 0,
            ctime: 0,
            fileid: "abc".to_string(),
            domain_type: "HomeDomain".to_string(),
            domain: String::new(),
            file_path: "Library".to_string(),
            file_name: "x".to_string(),
            link_target: String::new(),
            datahash: datahash.to_string(),
            flag: 0,
        }
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            detect_content_type(b"SQLite format 3\0 rest of header"),
            Some("application/x-sqlite3")
        );
        assert_eq!(
            detect_content_type(b"bplist00\xd1\x01\x02"),
            Some("application/x-bplist")
        );
        assert_eq!(
            detect_content_type(b"<?xml version=\"1.0\"?>\n<!DOCTYPE plist PUBLIC>"),
            Some("application/x-plist")
        );
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
        assert_eq!(detect_content_type(&jpeg), Some("image/jpeg"));
        let png = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(detect_content_type(&png), Some("image/png"));
        assert_eq!(
            detect_content_type(b"\x00\x00\x00\x18ftypheic"),
            Some("image/heic")
        );
        assert_eq!(detect_content_type(b"abc"), None);
    }

    #[test]
    fn test_text_detection() {
        assert!(is_text(b"Hello, world! This is plain text."));
        assert!(!is_text(&[0x00, 0xFF, 0x80, 0x7F, 0x90]));
        assert!(!is_text(b""));
    }

    #[test]
    fn test_read_header_limits_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, vec![0x41; 2000]).unwrap();
        assert_eq!(read_header(&path).unwrap().len(), HEADER_LEN);

        let missing = read_header(&dir.path().join("nope"));
        assert!(matches!(missing, Err(CatalogError::Filesystem { .. })));
    }

    #[test]
    fn test_check_blob_statuses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"Test data").unwrap();
        drop(file);

        let good = sha1_file(&path).unwrap();
        assert_eq!(check_blob(&entry(&good), &path).status, BlobStatus::Verified);

        let bad = "0".repeat(40);
        assert!(matches!(
            check_blob(&entry(&bad), &path).status,
            BlobStatus::Mismatch { .. }
        ));

        assert_eq!(check_blob(&entry(""), &path).status, BlobStatus::NoHash);
        assert_eq!(
            check_blob(&entry(&good), &dir.path().join("gone")).status,
            BlobStatus::Missing
        );
    }
}
