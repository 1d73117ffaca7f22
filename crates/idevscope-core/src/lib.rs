//! Catalog builder for device backup manifests
//!
//! Decodes `Manifest.mbdb` (with the optional legacy `Manifest.mbdx` side
//! table) into a queryable [`CatalogIndex`] and rebuilds the per-domain
//! directory hierarchy the manifest only describes as flat paths.

pub mod backup;
pub mod blob;
pub mod error;
pub mod index;
pub mod manifest;
pub mod store;
pub mod tree;

pub use backup::{
    open_manifest, Backup, BackupReader, BackupSummary, OpenConfig, OpenProgress, OpenReport,
    OpenStage,
};
pub use error::{CatalogError, Result};
pub use index::{CatalogIndex, EntryType, IndexBuilder, IndexEntry, IndexStats, PropertyEntry};
pub use manifest::{FileRecord, IdentifierResolver, IdentifierScheme, NO_FILE_ID};
pub use store::CatalogStore;
pub use tree::{
    build_domain_type_tree, build_tree, DomainTree, HierarchyBuilder, NodeId, TreeNode, MAX_JSON_DEPTH,
};
