//! Backup directory orchestration
//!
//! Detects which manifest layout a backup uses, runs the single
//! decode → resolve → index pass and publishes an immutable [`Backup`].
//! Nothing from a failed or cancelled pass is ever returned.

use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::blob;
use crate::error::{CatalogError, Result};
use crate::index::{CatalogIndex, EntryType, IndexBuilder, IndexEntry};
use crate::manifest::{
    is_real_file_id, IdentifierResolver, IdentifierScheme, ManifestReader, RecordDecoder,
    SideTable, MANIFEST_FILE, SIDE_TABLE_FILE,
};
use crate::tree::{build_domain_type_tree, build_tree, DomainTree};

/// Property-list files describing the backup itself, parsed elsewhere
pub const STANDARD_FILES: [&str; 3] = ["Manifest.plist", "Info.plist", "Status.plist"];

/// Options for opening a backup
#[derive(Debug, Clone)]
pub struct OpenConfig {
    /// Emit a progress update every this many records (0 disables)
    pub progress_interval: usize,
    /// Consult `Manifest.mbdx` when it is present
    pub use_side_table: bool,
}

impl Default for OpenConfig {
    fn default() -> Self {
        Self {
            progress_interval: 1000,
            use_side_table: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenStage {
    ReadingSideTable,
    DecodingRecords,
    Complete,
}

#[derive(Debug, Clone)]
pub struct OpenProgress {
    pub stage: OpenStage,
    pub records_decoded: usize,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub progress_percent: f32,
}

/// What happened during a successful open
#[derive(Debug, Default)]
pub struct OpenReport {
    pub records: usize,
    pub manifest_version: u16,
    pub lossy_names: usize,
    pub duplicate_file_ids: usize,
    /// Recoverable problems, currently only missing legacy identifiers
    pub warnings: Vec<CatalogError>,
    pub duration_ms: u64,
}

impl OpenReport {
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn missing_identifiers(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, CatalogError::MissingIdentifier { .. }))
            .count()
    }
}

/// Serializable overview of an opened backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummary {
    pub path: PathBuf,
    pub scheme: IdentifierScheme,
    pub manifest_version: u16,
    pub entries: usize,
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub total_bytes: u64,
    pub domain_types: usize,
    pub warnings: usize,
    pub duplicate_file_ids: usize,
    pub standard_files: Vec<String>,
}

/// A fully decoded backup; immutable and shareable between readers
#[derive(Debug)]
pub struct Backup {
    path: PathBuf,
    scheme: IdentifierScheme,
    index: CatalogIndex,
    report: OpenReport,
}

impl Backup {
    /// Open a backup directory with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        BackupReader::new(path).open()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scheme(&self) -> IdentifierScheme {
        self.scheme
    }

    pub fn index(&self) -> &CatalogIndex {
        &self.index
    }

    pub fn into_index(self) -> CatalogIndex {
        self.index
    }

    pub fn report(&self) -> &OpenReport {
        &self.report
    }

    pub fn tree(&self, domain_type: &str, domain: &str) -> DomainTree {
        build_tree(&self.index, domain_type, domain)
    }

    pub fn domain_type_tree(&self, domain_type: &str) -> DomainTree {
        build_domain_type_tree(&self.index, domain_type)
    }

    /// Standard property-list files present in the backup directory
    pub fn standard_files(&self) -> Vec<PathBuf> {
        STANDARD_FILES
            .iter()
            .map(|name| self.path.join(name))
            .filter(|p| p.is_file())
            .collect()
    }

    /// On-disk blob path of a file entry.
    ///
    /// `None` for directories, symlinks and unresolved identifiers.
    pub fn blob_path(&self, entry: &IndexEntry) -> Option<PathBuf> {
        if entry.entry_type != EntryType::File || !is_real_file_id(&entry.fileid) {
            return None;
        }
        Some(self.path.join(&entry.fileid))
    }

    /// Read the blob behind a catalog entry
    pub fn read_blob(&self, id: u64) -> Result<Vec<u8>> {
        let path = self.require_blob_path(id)?;
        std::fs::read(&path).map_err(|e| CatalogError::filesystem(path, e))
    }

    /// Sniff the content type of a blob from its first bytes, falling back
    /// to `text/plain` for unrecognized textual content
    pub fn blob_content_type(&self, id: u64) -> Result<Option<&'static str>> {
        let path = self.require_blob_path(id)?;
        let header = blob::read_header(&path)?;
        Ok(blob::detect_content_type(&header)
            .or_else(|| blob::is_text(&header).then_some("text/plain")))
    }

    /// Verify every file blob against its recorded data hash
    pub fn verify_blobs(&self) -> Vec<blob::BlobCheck> {
        self.index
            .iter()
            .filter_map(|entry| {
                let path = self.blob_path(entry)?;
                Some(blob::check_blob(entry, &path))
            })
            .collect()
    }

    pub fn summary(&self) -> BackupSummary {
        let stats = self.index.stats();
        BackupSummary {
            path: self.path.clone(),
            scheme: self.scheme,
            manifest_version: self.report.manifest_version,
            entries: stats.entries,
            files: stats.files,
            directories: stats.directories,
            symlinks: stats.symlinks,
            total_bytes: stats.total_bytes,
            domain_types: self.index.domain_types().len(),
            warnings: self.report.warning_count(),
            duplicate_file_ids: stats.duplicate_file_ids,
            standard_files: self
                .standard_files()
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
        }
    }

    fn require_blob_path(&self, id: u64) -> Result<PathBuf> {
        let entry = self.index.get(id).ok_or_else(|| {
            CatalogError::filesystem(
                self.path.join(format!("<entry {}>", id)),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such catalog entry"),
            )
        })?;
        self.blob_path(entry).ok_or_else(|| {
            CatalogError::filesystem(
                self.path.join(&entry.fileid),
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("entry {} has no blob", id),
                ),
            )
        })
    }
}

/// Opens a backup directory with progress reporting and cancellation
pub struct BackupReader {
    path: PathBuf,
    config: OpenConfig,
    cancel: Option<Arc<AtomicBool>>,
    progress_callback: Option<Box<dyn Fn(OpenProgress) + Send + Sync>>,
}

impl BackupReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: OpenConfig::default(),
            cancel: None,
            progress_callback: None,
        }
    }

    pub fn with_config(mut self, config: OpenConfig) -> Self {
        self.config = config;
        self
    }

    /// Checked between records; setting it abandons the open
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(OpenProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Run the full decode pass
    pub fn open(&self) -> Result<Backup> {
        let started = Instant::now();
        let (dir, manifest_path) = locate_manifest(&self.path)?;
        let side_table_path = dir.join(SIDE_TABLE_FILE);

        tracing::info!("Opening backup at {}", dir.display());

        let resolver = if self.config.use_side_table && side_table_path.is_file() {
            self.emit_progress(OpenStage::ReadingSideTable, 0, 0, 0);
            let mapped = map_file(&side_table_path)?;
            let table = SideTable::parse(&mapped)?;
            tracing::info!(
                "Using legacy identifiers from {} ({} entries)",
                side_table_path.display(),
                table.len()
            );
            IdentifierResolver::Legacy(table)
        } else {
            IdentifierResolver::Modern
        };

        let mapped = map_file(&manifest_path)?;
        let (index, mut report) = self.decode(&mapped, &resolver)?;
        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Read {} elements from {} in {} ms ({} warnings)",
            report.records,
            manifest_path.display(),
            report.duration_ms,
            report.warning_count()
        );

        Ok(Backup {
            path: dir,
            scheme: resolver.scheme(),
            index,
            report,
        })
    }

    /// Decode a manifest buffer into a catalog
    pub fn decode(
        &self,
        data: &[u8],
        resolver: &IdentifierResolver,
    ) -> Result<(CatalogIndex, OpenReport)> {
        let total_bytes = data.len() as u64;
        let mut reader = ManifestReader::new(data);
        let manifest_version = reader.verify_header()?;
        tracing::debug!("Manifest version {:#06x}, {} bytes", manifest_version, total_bytes);

        let mut decoder = RecordDecoder::new(&mut reader);
        let mut builder = IndexBuilder::new();
        let mut warnings = Vec::new();

        while decoder.has_more() {
            if self.is_cancelled() {
                tracing::info!(
                    "Open cancelled after {} records",
                    decoder.records_decoded()
                );
                return Err(CatalogError::Cancelled {
                    records: decoder.records_decoded(),
                });
            }

            let record = decoder.decode_next()?;
            let fileid = resolver.resolve_or_sentinel(&record, &mut warnings);
            builder.push(&record, fileid)?;

            let decoded = decoder.records_decoded();
            if self.config.progress_interval > 0 && decoded % self.config.progress_interval == 0 {
                self.emit_progress(
                    OpenStage::DecodingRecords,
                    decoded,
                    decoder.offset(),
                    total_bytes,
                );
            }
        }

        let records = decoder.records_decoded();
        let lossy_names = decoder.lossy_names();
        self.emit_progress(OpenStage::Complete, records, total_bytes, total_bytes);

        let index = builder.finish();
        let report = OpenReport {
            records,
            manifest_version,
            lossy_names,
            duplicate_file_ids: index.stats().duplicate_file_ids,
            warnings,
            duration_ms: 0,
        };
        Ok((index, report))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn emit_progress(&self, stage: OpenStage, records: usize, processed: u64, total: u64) {
        if let Some(ref callback) = self.progress_callback {
            let progress_percent = if total == 0 {
                0.0
            } else {
                processed as f32 / total as f32 * 100.0
            };
            callback(OpenProgress {
                stage,
                records_decoded: records,
                bytes_processed: processed,
                total_bytes: total,
                progress_percent,
            });
        }
    }
}

/// Open a manifest (or the backup directory holding it) and return its
/// catalog
pub fn open_manifest(path: impl AsRef<Path>) -> Result<CatalogIndex> {
    Backup::open(path).map(Backup::into_index)
}

/// Accept either a backup directory or the manifest file inside it
fn locate_manifest(path: &Path) -> Result<(PathBuf, PathBuf)> {
    if path.is_dir() {
        let manifest = path.join(MANIFEST_FILE);
        if !manifest.is_file() {
            return Err(CatalogError::ManifestNotFound(path.to_path_buf()));
        }
        return Ok((path.to_path_buf(), manifest));
    }

    if path.is_file() {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        return Ok((dir, path.to_path_buf()));
    }

    Err(CatalogError::ManifestNotFound(path.to_path_buf()))
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| CatalogError::filesystem(path, e))?;
    // Read-only mapping of a file that is not modified while open
    unsafe { MmapOptions::new().map(&file) }.map_err(|e| CatalogError::filesystem(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::record::tests::RecordBytes;
    use std::sync::Mutex;

    fn manifest_with(records: usize) -> Vec<u8> {
        let mut bytes = RecordBytes::default();
        bytes.buf.extend_from_slice(b"mbdb\x05\x00");
        for i in 0..records {
            bytes.record("HomeDomain", &format!("Library/f{}", i), 0x81A4, 1, &[]);
        }
        bytes.buf
    }

    #[test]
    fn test_decode_emits_progress() {
        let data = manifest_with(25);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let mut reader = BackupReader::new(".").with_config(OpenConfig {
            progress_interval: 10,
            ..Default::default()
        });
        reader.set_progress_callback(move |p| sink.lock().unwrap().push((p.stage, p.records_decoded)));

        let (index, report) = reader.decode(&data, &IdentifierResolver::Modern).unwrap();
        assert_eq!(index.len(), 25);
        assert_eq!(report.records, 25);
        assert_eq!(report.manifest_version, 0x0500);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (OpenStage::DecodingRecords, 10),
                (OpenStage::DecodingRecords, 20),
                (OpenStage::Complete, 25),
            ]
        );
    }

    #[test]
    fn test_cancel_discards_everything() {
        let data = manifest_with(5);
        let flag = Arc::new(AtomicBool::new(true));
        let reader = BackupReader::new(".").with_cancel_flag(flag);
        let result = reader.decode(&data, &IdentifierResolver::Modern);
        assert!(matches!(result, Err(CatalogError::Cancelled { records: 0 })));
    }

    #[test]
    fn test_cancel_mid_pass() {
        let data = manifest_with(10);
        let flag = Arc::new(AtomicBool::new(false));
        let trigger = flag.clone();

        let mut reader = BackupReader::new(".")
            .with_config(OpenConfig {
                progress_interval: 3,
                ..Default::default()
            })
            .with_cancel_flag(flag);
        reader.set_progress_callback(move |p| {
            if p.records_decoded == 6 {
                trigger.store(true, Ordering::Relaxed);
            }
        });

        let result = reader.decode(&data, &IdentifierResolver::Modern);
        assert!(matches!(result, Err(CatalogError::Cancelled { records: 6 })));
    }

    #[test]
    fn test_empty_manifest_is_empty_catalog() {
        let data = manifest_with(0);
        let reader = BackupReader::new(".");
        let (index, report) = reader.decode(&data, &IdentifierResolver::Modern).unwrap();
        assert!(index.is_empty());
        assert_eq!(report.records, 0);
    }

    #[test]
    fn test_locate_manifest_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            locate_manifest(dir.path()),
            Err(CatalogError::ManifestNotFound(_))
        ));
    }
}
