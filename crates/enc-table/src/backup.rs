//! Point-in-time backups of the registry.
//!
//! A snapshot is a gzip-compressed logical dump named `<YYYYMMDD-HHMMSS>.sql.gz`:
//!
//! ```text
//! BEGIN TRANSACTION;
//! CREATE TABLE "nodes" ( "fqdn" TEXT PRIMARY KEY, ... );
//! INSERT INTO "nodes" VALUES('host1.example.com','web',...);
//! COMMIT;
//! ```
//!
//! Restoring drops the node table and replays the whole script, so the store
//! ends up exactly as dumped. Two snapshots taken within the same second
//! share a file name and the later one overwrites the earlier.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, instrument};

use crate::error::EncError;
use crate::schema::{quote_ident, TableSchema};
use crate::store::TableStore;

const SNAPSHOT_SUFFIX: &str = ".sql.gz";

/// Writes and restores snapshots under one backup directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dumps the whole store to a new timestamped snapshot and returns its path.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn snapshot(&self, store: &TableStore) -> Result<PathBuf, EncError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| EncError::io(&self.dir, e))?;
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = self.dir.join(format!("{timestamp}{SNAPSHOT_SUFFIX}"));

        let lines = dump(store)?;
        let file = File::create(&path).map_err(|e| EncError::io(&path, e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        for line in &lines {
            writeln!(encoder, "{line}").map_err(|e| EncError::io(&path, e))?;
        }
        encoder
            .finish()
            .and_then(|mut w| w.flush())
            .map_err(|e| EncError::io(&path, e))?;

        info!("Backup written to {} ({} lines)", path.display(), lines.len());
        Ok(path)
    }

    /// Replaces the node table with the contents of `source`, then snapshots
    /// the restored state. Relative sources are looked up in the backup
    /// directory. Returns the path of the new snapshot.
    #[instrument(skip_all, fields(source = %source.display()))]
    pub fn restore(
        &self,
        store: &TableStore,
        schema: &TableSchema,
        source: &Path,
    ) -> Result<PathBuf, EncError> {
        let path = self.resolve(source);
        if !path.is_file() {
            return Err(EncError::BackupNotFound(path));
        }
        let script = read_snapshot(&path)?;

        store.drop_table(schema)?;
        store.execute_script(&script)?;
        info!("Restored {} from {}", schema.name, path.display());

        self.snapshot(store)
    }

    /// Resolves a restore source against the backup directory.
    pub fn resolve(&self, source: &Path) -> PathBuf {
        if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.dir.join(source)
        }
    }
}

/// Reads a snapshot back as a single SQL script.
pub fn read_snapshot(path: &Path) -> Result<String, EncError> {
    let file = File::open(path).map_err(|e| EncError::io(path, e))?;
    let mut script = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut script)
        .map_err(|e| EncError::io(path, e))?;
    Ok(script)
}

/// Full logical dump of the store: schema and data, one statement per line.
pub fn dump(store: &TableStore) -> Result<Vec<String>, EncError> {
    let conn = store.conn();
    let mut lines = vec!["BEGIN TRANSACTION;".to_string()];

    let tables: Vec<(String, String)> = conn
        .prepare(
            "SELECT name, sql FROM sqlite_master \
             WHERE sql NOT NULL AND type = 'table' ORDER BY name",
        )?
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    for (name, sql) in &tables {
        if name == "sqlite_sequence" {
            lines.push("DELETE FROM \"sqlite_sequence\";".to_string());
        } else if name.starts_with("sqlite_") {
            continue;
        } else {
            lines.push(format!("{sql};"));
        }
        lines.extend(dump_rows(store, name)?);
    }

    let others: Vec<String> = conn
        .prepare(
            "SELECT sql FROM sqlite_master \
             WHERE sql NOT NULL AND type IN ('index', 'trigger', 'view')",
        )?
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    lines.extend(others.into_iter().map(|sql| format!("{sql};")));

    lines.push("COMMIT;".to_string());
    Ok(lines)
}

/// One `INSERT` per row, values rendered by SQLite's own `quote()`.
fn dump_rows(store: &TableStore, table: &str) -> Result<Vec<String>, EncError> {
    let conn = store.conn();
    let quoted = quote_ident(table);
    let columns: Vec<String> = conn
        .prepare(&format!("PRAGMA table_info({quoted})"))?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let values = columns
        .iter()
        .map(|c| format!("quote({})", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" || ',' || ");
    let prefix = format!("INSERT INTO {quoted} VALUES(").replace('\'', "''");
    let sql = format!("SELECT '{prefix}' || {values} || ');' FROM {quoted}");

    let rows = conn
        .prepare(&sql)?
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}
