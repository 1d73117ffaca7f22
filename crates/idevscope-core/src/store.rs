//! SQLite persistence for a built catalog

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::index::{CatalogIndex, EntryType, IndexEntry, PropertyEntry};

/// SQLite file holding the `indice` and `properties` tables of one catalog
pub struct CatalogStore {
    conn: Connection,
    db_path: PathBuf,
}

impl CatalogStore {
    /// Open or create a catalog database at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create catalog directory")?;
            }
        }

        let conn = Connection::open(&db_path)
            .context(format!("Failed to open catalog at {}", db_path.display()))?;

        let store = Self { conn, db_path };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory catalog database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory catalog")?;
        let store = Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS indice (
                id INTEGER PRIMARY KEY,
                type VARCHAR(1) NOT NULL,
                permissions VARCHAR(9) NOT NULL,
                userid VARCHAR(8) NOT NULL,
                groupid VARCHAR(8) NOT NULL,
                filelen INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                atime INTEGER NOT NULL,
                ctime INTEGER NOT NULL,
                fileid VARCHAR(50) NOT NULL,
                domain_type VARCHAR(100) NOT NULL,
                domain VARCHAR(100) NOT NULL,
                file_path VARCHAR(100) NOT NULL,
                file_name VARCHAR(100) NOT NULL,
                link_target VARCHAR(100) NOT NULL,
                datahash VARCHAR(100) NOT NULL,
                flag INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS properties (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL REFERENCES indice(id),
                property_name VARCHAR(100) NOT NULL,
                property_val VARCHAR(100) NOT NULL
            );

            CREATE INDEX IF NOT EXISTS indice_domain_path
                ON indice (domain_type, domain, file_path);

            CREATE INDEX IF NOT EXISTS properties_file_id
                ON properties (file_id);
            "#,
            )
            .context("Failed to initialize catalog schema")?;

        Ok(())
    }

    /// Replace the stored catalog with `index`
    pub fn export(&mut self, index: &CatalogIndex) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .context("Failed to start catalog transaction")?;

        tx.execute_batch("DELETE FROM properties; DELETE FROM indice;")
            .context("Failed to clear previous catalog")?;

        {
            let mut insert_entry = tx.prepare(
                r#"
                INSERT INTO indice (
                    id, type, permissions, userid, groupid, filelen,
                    mtime, atime, ctime, fileid, domain_type, domain,
                    file_path, file_name, link_target, datahash, flag
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
            )?;

            for entry in index.iter() {
                insert_entry
                    .execute(params![
                        entry.id as i64,
                        entry.entry_type.as_char().to_string(),
                        entry.permissions,
                        entry.userid,
                        entry.groupid,
                        entry.filelen as i64,
                        entry.mtime,
                        entry.atime,
                        entry.ctime,
                        entry.fileid,
                        entry.domain_type,
                        entry.domain,
                        entry.file_path,
                        entry.file_name,
                        entry.link_target,
                        entry.datahash,
                        entry.flag,
                    ])
                    .context(format!("Failed to store entry {}", entry.id))?;
            }

            let mut insert_property = tx.prepare(
                "INSERT INTO properties (file_id, property_name, property_val) VALUES (?1, ?2, ?3)",
            )?;
            for property in index.all_properties() {
                insert_property
                    .execute(params![
                        property.file_id as i64,
                        property.property_name,
                        property.property_val,
                    ])
                    .context(format!("Failed to store property of entry {}", property.file_id))?;
            }
        }

        tx.commit().context("Failed to commit catalog")?;

        tracing::info!(
            "Exported {} entries and {} properties to {}",
            index.len(),
            index.all_properties().len(),
            self.db_path.display()
        );
        Ok(())
    }

    /// Rebuild a catalog from the stored tables
    pub fn load(&self) -> Result<CatalogIndex> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                id, type, permissions, userid, groupid, filelen,
                mtime, atime, ctime, fileid, domain_type, domain,
                file_path, file_name, link_target, datahash, flag
            FROM indice
            ORDER BY id
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let type_str: String = row.get(1)?;
                let filelen: i64 = row.get(5)?;
                Ok((
                    id,
                    type_str,
                    IndexEntry {
                        id: id as u64,
                        entry_type: EntryType::File,
                        permissions: row.get(2)?,
                        userid: row.get(3)?,
                        groupid: row.get(4)?,
                        filelen: filelen as u64,
                        mtime: row.get(6)?,
                        atime: row.get(7)?,
                        ctime: row.get(8)?,
                        fileid: row.get(9)?,
                        domain_type: row.get(10)?,
                        domain: row.get(11)?,
                        file_path: row.get(12)?,
                        file_name: row.get(13)?,
                        link_target: row.get(14)?,
                        datahash: row.get(15)?,
                        flag: row.get(16)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query catalog entries")?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, type_str, mut entry) in rows {
            entry.entry_type = type_str
                .chars()
                .next()
                .and_then(EntryType::from_char)
                .with_context(|| format!("Unknown entry type {:?} for entry {}", type_str, id))?;
            entries.push(entry);
        }

        let mut stmt = self.conn.prepare(
            "SELECT file_id, property_name, property_val FROM properties ORDER BY id",
        )?;
        let properties = stmt
            .query_map([], |row| {
                let file_id: i64 = row.get(0)?;
                Ok(PropertyEntry {
                    file_id: file_id as u64,
                    property_name: row.get(1)?,
                    property_val: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query catalog properties")?;

        tracing::debug!(
            "Loaded {} entries and {} properties from {}",
            entries.len(),
            properties.len(),
            self.db_path.display()
        );
        Ok(CatalogIndex::from_parts(entries, properties))
    }
}
