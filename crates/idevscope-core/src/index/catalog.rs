//! Catalog construction and query surface
//!
//! `IndexBuilder` is fed one decoded record at a time and consumed by
//! `finish()`; a failed pass simply drops the builder, so a partially built
//! catalog is never observable. `CatalogIndex` is immutable once built.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::entry::{hex_string, EntryType, IndexEntry, PropertyEntry};
use crate::error::Result;
use crate::manifest::{is_real_file_id, FileRecord};

/// Summary counters for a built catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub entries: usize,
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub properties: usize,
    pub total_bytes: u64,
    /// Entries whose resolved file id was already used by an earlier entry
    pub duplicate_file_ids: usize,
    /// Entries whose (domain type, domain, path, name) repeats an earlier one
    pub duplicate_positions: usize,
}

/// Accumulates catalog rows during a single decode pass
#[derive(Debug, Default)]
pub struct IndexBuilder {
    entries: Vec<IndexEntry>,
    properties: Vec<PropertyEntry>,
    seen_file_ids: HashMap<String, u64>,
    seen_positions: HashSet<(String, String, String, String)>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalize a record into one entry plus its properties and return the
    /// assigned id.
    pub fn push(&mut self, record: &FileRecord, fileid: String) -> Result<u64> {
        let id = self.entries.len() as u64 + 1;
        let entry = IndexEntry::from_record(id, record, fileid)?;

        if is_real_file_id(&entry.fileid) {
            if let Some(first) = self.seen_file_ids.get(&entry.fileid) {
                tracing::warn!(
                    "File id {} of entry {} ({}:{}) already used by entry {}",
                    entry.fileid,
                    id,
                    entry.full_domain(),
                    entry.full_path(),
                    first
                );
            } else {
                self.seen_file_ids.insert(entry.fileid.clone(), id);
            }
        }

        let position = (
            entry.domain_type.clone(),
            entry.domain.clone(),
            entry.file_path.clone(),
            entry.file_name.clone(),
        );
        if !self.seen_positions.insert(position) {
            tracing::warn!(
                "Entry {} repeats catalog position {}:{}",
                id,
                entry.full_domain(),
                entry.full_path()
            );
        }

        for (name, value) in &record.properties {
            self.properties.push(PropertyEntry {
                file_id: id,
                property_name: name.clone(),
                property_val: hex_string(value),
            });
        }

        self.entries.push(entry);
        Ok(id)
    }

    /// Freeze the accumulated rows into a queryable catalog
    pub fn finish(self) -> CatalogIndex {
        CatalogIndex::from_parts(self.entries, self.properties)
    }
}

/// Read-only catalog of one opened backup
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    entries: Vec<IndexEntry>,
    properties: Vec<PropertyEntry>,
    by_id: HashMap<u64, usize>,
    properties_by_file: HashMap<u64, Vec<usize>>,
    /// domain type -> domain -> entry positions ordered by (path, name)
    domains: BTreeMap<String, BTreeMap<String, Vec<usize>>>,
    stats: IndexStats,
}

impl CatalogIndex {
    /// Build the lookup structures and counters over existing rows.
    ///
    /// Entries keep their ids; properties keep their relative order.
    /// Duplicate counters are derived from the rows, so a catalog reloaded
    /// from a store reports the same stats as the one that was exported.
    pub fn from_parts(entries: Vec<IndexEntry>, properties: Vec<PropertyEntry>) -> Self {
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut domains: BTreeMap<String, BTreeMap<String, Vec<usize>>> = BTreeMap::new();
        let mut seen_file_ids: HashSet<&str> = HashSet::new();
        let mut seen_positions: HashSet<(&str, &str, &str, &str)> = HashSet::new();
        let mut stats = IndexStats {
            entries: entries.len(),
            properties: properties.len(),
            ..Default::default()
        };

        for (pos, entry) in entries.iter().enumerate() {
            by_id.insert(entry.id, pos);
            if is_real_file_id(&entry.fileid) && !seen_file_ids.insert(entry.fileid.as_str()) {
                stats.duplicate_file_ids += 1;
            }
            if !seen_positions.insert((
                entry.domain_type.as_str(),
                entry.domain.as_str(),
                entry.file_path.as_str(),
                entry.file_name.as_str(),
            )) {
                stats.duplicate_positions += 1;
            }
            domains
                .entry(entry.domain_type.clone())
                .or_default()
                .entry(entry.domain.clone())
                .or_default()
                .push(pos);

            match entry.entry_type {
                EntryType::File => {
                    stats.files += 1;
                    stats.total_bytes = stats.total_bytes.saturating_add(entry.filelen);
                }
                EntryType::Directory => stats.directories += 1,
                EntryType::Symlink => stats.symlinks += 1,
            }
        }

        for positions in domains.values_mut().flat_map(|d| d.values_mut()) {
            positions.sort_by(|&a, &b| {
                let (ea, eb) = (&entries[a], &entries[b]);
                (&ea.file_path, &ea.file_name, ea.id).cmp(&(&eb.file_path, &eb.file_name, eb.id))
            });
        }

        let mut properties_by_file: HashMap<u64, Vec<usize>> = HashMap::new();
        for (pos, property) in properties.iter().enumerate() {
            properties_by_file
                .entry(property.file_id)
                .or_default()
                .push(pos);
        }

        Self {
            entries,
            properties,
            by_id,
            properties_by_file,
            domains,
            stats,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// All entries in id order
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    pub fn all_properties(&self) -> &[PropertyEntry] {
        &self.properties
    }

    pub fn get(&self, id: u64) -> Option<&IndexEntry> {
        self.by_id.get(&id).map(|&pos| &self.entries[pos])
    }

    /// Properties of an entry in append order
    pub fn properties_of(&self, id: u64) -> Vec<&PropertyEntry> {
        self.properties_by_file
            .get(&id)
            .map(|positions| positions.iter().map(|&p| &self.properties[p]).collect())
            .unwrap_or_default()
    }

    /// Distinct domain types, sorted
    pub fn domain_types(&self) -> Vec<&str> {
        self.domains.keys().map(String::as_str).collect()
    }

    /// Distinct domains of a domain type, sorted
    pub fn domains(&self, domain_type: &str) -> Vec<&str> {
        self.domains
            .get(domain_type)
            .map(|d| d.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Entries of one domain ordered by (file path, file name)
    pub fn entries(&self, domain_type: &str, domain: &str) -> Vec<&IndexEntry> {
        self.domains
            .get(domain_type)
            .and_then(|d| d.get(domain))
            .map(|positions| positions.iter().map(|&p| &self.entries[p]).collect())
            .unwrap_or_default()
    }

    /// Entries resolved to a given file id
    pub fn find_by_file_id(&self, fileid: &str) -> Vec<&IndexEntry> {
        self.entries.iter().filter(|e| e.fileid == fileid).collect()
    }
}
