use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use idevscope_core::blob::BlobStatus;
use idevscope_core::{
	Backup, BackupReader, CatalogStore, DomainTree, EntryType, IndexEntry, OpenConfig, OpenStage,
	PropertyEntry,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "idevscope", version, about = "idevscope - Device backup manifest browser")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
	/// Enable debug logging
	#[arg(long, short, global = true)]
	verbose: bool,
	/// Ignore Manifest.mbdx and derive identifiers from domain and path
	#[arg(long, global = true)]
	no_side_table: bool,
	/// Records between progress updates (0 disables)
	#[arg(long, global = true, default_value = "1000")]
	progress_interval: usize,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Show an overview of a backup
	Info {
		/// Backup directory or its Manifest.mbdb
		backup: PathBuf,
		#[arg(long)]
		json: bool,
	},
	/// List domain types and their domains
	Domains {
		backup: PathBuf,
	},
	/// Print the reconstructed directory tree of a domain type
	Tree {
		backup: PathBuf,
		/// Domain type, e.g. HomeDomain or AppDomain
		domain_type: String,
		/// Restrict to one domain within the domain type
		#[arg(long)]
		domain: Option<String>,
		#[arg(long)]
		json: bool,
	},
	/// Show one catalog entry with its properties
	Show {
		backup: PathBuf,
		/// Catalog entry id
		id: u64,
		#[arg(long)]
		json: bool,
	},
	/// Export the catalog to a SQLite database
	ExportDb {
		backup: PathBuf,
		/// Output database path
		out: PathBuf,
	},
	/// Check blob files against the recorded data hashes
	Verify {
		backup: PathBuf,
	},
}

#[derive(Serialize)]
struct ShowOutput<'a> {
	entry: &'a IndexEntry,
	properties: Vec<&'a PropertyEntry>,
	blob: Option<PathBuf>,
	content_type: Option<&'static str>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();

	let config = OpenConfig {
		progress_interval: cli.progress_interval,
		use_side_table: !cli.no_side_table,
	};

	match cli.command {
		Commands::Info { backup, json } => {
			let backup = open_backup(&backup, config)?;
			let summary = backup.summary();

			if json {
				println!("{}", serde_json::to_string_pretty(&summary)?);
				return Ok(());
			}

			println!("📱 Backup: {}", summary.path.display());
			println!("🔑 Identifiers: {}", summary.scheme);
			println!("📄 Manifest Version: {:#06x}", summary.manifest_version);
			println!("📊 Entries: {}", summary.entries);
			println!("   Files: {}", summary.files);
			println!("   Directories: {}", summary.directories);
			println!("   Symlinks: {}", summary.symlinks);
			println!("💾 Total Size: {} MB", summary.total_bytes / (1024 * 1024));
			println!("🗂️  Domain Types: {}", summary.domain_types);
			if !summary.standard_files.is_empty() {
				println!("📋 Standard Files: {}", summary.standard_files.join(", "));
			}
			if summary.duplicate_file_ids > 0 {
				println!("⚠️  Duplicate File Ids: {}", summary.duplicate_file_ids);
			}
			if summary.warnings > 0 {
				println!("⚠️  Warnings: {}", summary.warnings);
				for warning in backup.report().warnings.iter().take(10) {
					println!("   {}", warning);
				}
			}
		}
		Commands::Domains { backup } => {
			let backup = open_backup(&backup, config)?;
			let index = backup.index();

			for domain_type in index.domain_types() {
				let domains = index.domains(domain_type);
				println!("📁 {} ({} domains)", domain_type, domains.len());
				for domain in domains {
					let count = index.entries(domain_type, domain).len();
					let label = if domain.is_empty() { "<none>" } else { domain };
					println!("   {} ({} entries)", label, count);
				}
			}
		}
		Commands::Tree { backup, domain_type, domain, json } => {
			let backup = open_backup(&backup, config)?;
			if !backup.index().domain_types().contains(&domain_type.as_str()) {
				bail!("Unknown domain type {}", domain_type);
			}

			let tree = match domain {
				Some(domain) => backup.tree(&domain_type, &domain),
				None => backup.domain_type_tree(&domain_type),
			};

			if json {
				println!("{}", serde_json::to_string_pretty(&tree.to_json()?)?);
			} else {
				print_tree(&tree);
			}
		}
		Commands::Show { backup, id, json } => {
			let backup = open_backup(&backup, config)?;
			let entry = backup
				.index()
				.get(id)
				.with_context(|| format!("No catalog entry with id {}", id))?;
			let properties = backup.index().properties_of(id);
			let blob = backup.blob_path(entry);
			let content_type = match blob {
				Some(ref path) if path.is_file() => backup.blob_content_type(id)?,
				_ => None,
			};

			if json {
				let output = ShowOutput { entry, properties, blob, content_type };
				println!("{}", serde_json::to_string_pretty(&output)?);
				return Ok(());
			}

			println!("🔎 Entry {}", entry.id);
			println!("   Type: {}", entry.entry_type);
			println!("   Domain: {}", entry.full_domain());
			println!("   Path: {}", entry.full_path());
			println!("   Permissions: {}", entry.permissions);
			println!("   Owner: {}:{}", entry.userid, entry.groupid);
			println!("   Size: {} bytes", entry.filelen);
			println!("   Modified: {}", format_time(entry.mtime_utc()));
			println!("   Accessed: {}", format_time(entry.atime_utc()));
			println!("   Changed: {}", format_time(entry.ctime_utc()));
			println!("   File Id: {}", entry.fileid);
			if !entry.link_target.is_empty() {
				println!("   Link Target: {}", entry.link_target);
			}
			if !entry.datahash.is_empty() {
				println!("   Data Hash: {}", entry.datahash);
			}
			if let Some(path) = blob {
				println!("   Blob: {}", path.display());
			}
			if let Some(content_type) = content_type {
				println!("   Content Type: {}", content_type);
			}
			if !properties.is_empty() {
				println!("🏷️  Properties:");
				for property in properties {
					println!("   {} = {}", property.property_name, property.property_val);
				}
			}
		}
		Commands::ExportDb { backup, out } => {
			let backup = open_backup(&backup, config)?;
			let mut store = CatalogStore::open(&out)?;
			store.export(backup.index())?;

			println!("✅ Export completed successfully!");
			println!("💾 Database: {}", store.path().display());
			println!("📈 Entries: {}", backup.index().len());
			println!("🏷️  Properties: {}", backup.index().all_properties().len());
		}
		Commands::Verify { backup } => {
			let backup = open_backup(&backup, config)?;
			let checks = backup.verify_blobs();

			let mut verified = 0;
			let mut unhashed = 0;
			let mut failed = 0;
			for check in &checks {
				match &check.status {
					BlobStatus::Verified => verified += 1,
					BlobStatus::NoHash => unhashed += 1,
					BlobStatus::Mismatch { actual } => {
						failed += 1;
						println!("❌ {} hash {} expected {}", check.path.display(), actual, check.expected);
					}
					BlobStatus::Missing => {
						failed += 1;
						println!("❌ {} missing", check.path.display());
					}
					BlobStatus::Unreadable(reason) => {
						failed += 1;
						println!("❌ {} unreadable: {}", check.path.display(), reason);
					}
				}
			}

			println!("🔍 Checked {} blobs", checks.len());
			println!("✅ Verified: {}", verified);
			println!("➖ Without Hash: {}", unhashed);
			if failed > 0 {
				bail!("{} blobs failed verification", failed);
			}
		}
	}
	Ok(())
}

/// Open a backup, with a spinner when stderr is a terminal
fn open_backup(path: &Path, config: OpenConfig) -> Result<Backup> {
	let mut reader = BackupReader::new(path).with_config(config);

	let spinner = if atty::is(atty::Stream::Stderr) {
		let pb = ProgressBar::new_spinner();
		pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
		pb.enable_steady_tick(Duration::from_millis(100));

		let handle = pb.clone();
		reader.set_progress_callback(move |progress| {
			let message = match progress.stage {
				OpenStage::ReadingSideTable => "Reading Manifest.mbdx".to_string(),
				OpenStage::DecodingRecords => format!(
					"Decoding records: {} ({:.0}%)",
					progress.records_decoded, progress.progress_percent
				),
				OpenStage::Complete => format!("Decoded {} records", progress.records_decoded),
			};
			handle.set_message(message);
		});
		Some(pb)
	} else {
		None
	};

	let result = reader.open();
	if let Some(pb) = spinner {
		pb.finish_and_clear();
	}

	result.with_context(|| format!("Failed to open backup at {}", path.display()))
}

fn print_tree(tree: &DomainTree) {
	for (id, depth) in tree.walk() {
		let node = tree.node(id);
		let indent = "  ".repeat(depth);
		match node.kind {
			EntryType::Directory => {
				let marker = if node.is_synthesized() && id != tree.root() { " *" } else { "" };
				println!("{}📁 {}{}", indent, node.name, marker);
			}
			EntryType::Symlink => println!("{}🔗 {}", indent, node.name),
			EntryType::File => {
				println!("{}📄 {} ({} bytes)", indent, node.name, node.size.unwrap_or(0))
			}
		}
	}
	let synthesized = tree.synthesized_count();
	if synthesized > 0 {
		println!();
		println!("* {} directories inferred from file paths", synthesized);
	}
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
	time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
		.unwrap_or_else(|| "-".to_string())
}
