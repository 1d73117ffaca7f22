//! Manifest decoding: byte cursor, record decoder, side table and
//! identifier resolution.

pub mod identifier;
pub mod mbdx;
pub mod reader;
pub mod record;

pub use identifier::{
    is_real_file_id, modern_file_id, IdentifierResolver, IdentifierScheme, NO_FILE_ID,
};
pub use mbdx::SideTable;
pub use reader::{ManifestReader, MBDB_HEADER_LEN, MBDB_MAGIC};
pub use record::{FileRecord, RecordDecoder};

/// Manifest file name inside a backup directory
pub const MANIFEST_FILE: &str = "Manifest.mbdb";

/// Legacy side table file name inside a backup directory
pub const SIDE_TABLE_FILE: &str = "Manifest.mbdx";
