//! Error taxonomy for manifest decoding and catalog construction

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening a backup or reading from its catalog.
///
/// `Format`, `TruncatedInput` and `CorruptRecord` are fatal: the pass that
/// produced them is abandoned and no catalog is published. `MissingIdentifier`
/// is only ever collected as a warning in [`crate::backup::OpenReport`].
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("format error at offset {offset}{}: {reason}", record_suffix(.record))]
    Format {
        offset: u64,
        record: Option<usize>,
        reason: String,
    },

    #[error(
        "truncated input at offset {offset}{}: needed {needed} bytes, {remaining} remaining",
        record_suffix(.record)
    )]
    TruncatedInput {
        offset: u64,
        record: Option<usize>,
        needed: usize,
        remaining: usize,
    },

    #[error("corrupt record at offset {offset}{}: {reason}", record_suffix(.record))]
    CorruptRecord {
        offset: u64,
        record: Option<usize>,
        reason: String,
    },

    #[error("no file id for record {record} at offset {offset} ({domain}:{filename})")]
    MissingIdentifier {
        offset: u64,
        record: usize,
        domain: String,
        filename: String,
    },

    #[error("cannot read {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no Manifest.mbdb found in {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("backup open cancelled after {records} records")]
    Cancelled { records: usize },

    #[error("tree depth {depth} exceeds the rendering limit of {limit}")]
    TreeTooDeep { depth: usize, limit: usize },
}

fn record_suffix(record: &Option<usize>) -> String {
    match record {
        Some(index) => format!(" (record {})", index),
        None => String::new(),
    }
}

impl CatalogError {
    /// True for errors that abort a decode pass
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CatalogError::MissingIdentifier { .. })
    }

    /// Byte offset in the manifest the error refers to, if any
    pub fn offset(&self) -> Option<u64> {
        match self {
            CatalogError::Format { offset, .. }
            | CatalogError::TruncatedInput { offset, .. }
            | CatalogError::CorruptRecord { offset, .. }
            | CatalogError::MissingIdentifier { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Record ordinal the error refers to, if any
    pub fn record(&self) -> Option<usize> {
        match self {
            CatalogError::Format { record, .. }
            | CatalogError::TruncatedInput { record, .. }
            | CatalogError::CorruptRecord { record, .. } => *record,
            CatalogError::MissingIdentifier { record, .. } => Some(*record),
            _ => None,
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CatalogError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
