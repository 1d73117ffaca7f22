/// File id resolution for manifest records
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::mbdx::SideTable;
use super::record::FileRecord;
use crate::error::CatalogError;

/// Stored in place of a file id the legacy side table does not know.
/// Never a valid blob name.
pub const NO_FILE_ID: &str = "<nofileID>";

/// Which identifier scheme a manifest uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierScheme {
    /// SHA-1 of `"{domain}-{filename}"`
    Modern,
    /// Offset lookup in a `Manifest.mbdx` side table
    Legacy,
}

impl std::fmt::Display for IdentifierScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierScheme::Modern => write!(f, "modern (SHA-1 of domain-path)"),
            IdentifierScheme::Legacy => write!(f, "legacy (Manifest.mbdx offsets)"),
        }
    }
}

/// Resolves the blob name of each record; chosen once per manifest
#[derive(Debug, Clone)]
pub enum IdentifierResolver {
    Modern,
    Legacy(SideTable),
}

impl IdentifierResolver {
    pub fn scheme(&self) -> IdentifierScheme {
        match self {
            IdentifierResolver::Modern => IdentifierScheme::Modern,
            IdentifierResolver::Legacy(_) => IdentifierScheme::Legacy,
        }
    }

    /// Resolve a record's file id.
    ///
    /// Only the legacy scheme can fail, with `MissingIdentifier` when the
    /// record offset is absent from the side table.
    pub fn resolve(&self, record: &FileRecord) -> Result<String, CatalogError> {
        match self {
            IdentifierResolver::Modern => Ok(modern_file_id(&record.domain, &record.filename)),
            IdentifierResolver::Legacy(table) => table
                .lookup(record.offset)
                .map(str::to_string)
                .ok_or_else(|| CatalogError::MissingIdentifier {
                    offset: record.offset,
                    record: record.index,
                    domain: record.domain.clone(),
                    filename: record.filename.clone(),
                }),
        }
    }

    /// Resolve a file id, substituting [`NO_FILE_ID`] and recording a
    /// warning when it cannot be found.
    pub fn resolve_or_sentinel(
        &self,
        record: &FileRecord,
        warnings: &mut Vec<CatalogError>,
    ) -> String {
        match self.resolve(record) {
            Ok(file_id) => file_id,
            Err(warning) => {
                tracing::warn!("{}", warning);
                warnings.push(warning);
                NO_FILE_ID.to_string()
            }
        }
    }
}

/// Lowercase hex SHA-1 of `"{domain}-{filename}"`
pub fn modern_file_id(domain: &str, filename: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(domain.as_bytes());
    hasher.update(b"-");
    hasher.update(filename.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// True when a file id can name a blob on disk
pub fn is_real_file_id(file_id: &str) -> bool {
    file_id != NO_FILE_ID && !file_id.is_empty()
}
