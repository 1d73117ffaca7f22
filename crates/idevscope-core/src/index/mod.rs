//! Queryable catalog built from decoded manifest records

pub mod catalog;
pub mod entry;

pub use catalog::{CatalogIndex, IndexBuilder, IndexStats};
pub use entry::{
    hex_string, permission_string, split_domain, split_path, EntryType, IndexEntry,
    PropertyEntry,
};
