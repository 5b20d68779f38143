//! SQLite batch store
//!
//! Every batch is applied inside one transaction, so a failure part-way
//! through rolls back every file of that batch.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::{
    content_hash, revision_message, ApplyOutcome, BatchStore, Revision, StoreError, StoreResult,
    StoreStats,
};
use crate::protocol::{FileBatch, FileContent};

/// SQLite implementation of [`BatchStore`]
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS files (
                    plugin_id TEXT NOT NULL,
                    path TEXT NOT NULL,
                    content BLOB NOT NULL,
                    is_binary INTEGER NOT NULL DEFAULT 0,
                    content_hash TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (plugin_id, path)
                );

                CREATE TABLE IF NOT EXISTS revisions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    plugin_id TEXT NOT NULL,
                    files INTEGER NOT NULL,
                    changed INTEGER NOT NULL,
                    message TEXT NOT NULL,
                    applied_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_revisions_plugin
                    ON revisions(plugin_id, id);
                "#,
        )?;
        Ok(())
    }
}

impl BatchStore for SqliteStore {
    fn apply(&self, plugin_id: &str, batch: &FileBatch) -> StoreResult<ApplyOutcome> {
        if batch.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut changed = 0;

        {
            let mut select = tx.prepare_cached(
                "SELECT content_hash, is_binary FROM files WHERE plugin_id = ?1 AND path = ?2",
            )?;
            let mut upsert = tx.prepare_cached(
                r#"
                    INSERT INTO files (plugin_id, path, content, is_binary, content_hash, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(plugin_id, path) DO UPDATE SET
                        content = excluded.content,
                        is_binary = excluded.is_binary,
                        content_hash = excluded.content_hash,
                        updated_at = excluded.updated_at
                    "#,
            )?;

            for (path, content) in batch.iter() {
                let bytes = content.as_bytes();
                let hash = content_hash(bytes);
                let binary = content.is_binary();
                let previous: Option<(String, bool)> = select
                    .query_row(params![plugin_id, path], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()?;

                if previous != Some((hash.clone(), binary)) {
                    upsert.execute(params![plugin_id, path, bytes, binary, hash, now])?;
                    changed += 1;
                }
            }
        }

        tx.execute(
            "INSERT INTO revisions (plugin_id, files, changed, message, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                plugin_id,
                batch.len() as i64,
                changed as i64,
                revision_message(plugin_id, now),
                now
            ],
        )?;
        let revision = tx.last_insert_rowid() as u64;

        // Dropping the transaction without commit rolls everything back.
        tx.commit()?;

        Ok(ApplyOutcome {
            files_applied: batch.len(),
            files_changed: changed,
            revision: Some(revision),
        })
    }

    fn get(&self, plugin_id: &str, path: &str) -> StoreResult<Option<FileContent>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let row: Option<(Vec<u8>, bool)> = conn
            .query_row(
                "SELECT content, is_binary FROM files WHERE plugin_id = ?1 AND path = ?2",
                params![plugin_id, path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(bytes, binary)| {
            if binary {
                FileContent::from(bytes)
            } else {
                FileContent::from_bytes(bytes)
            }
        }))
    }

    fn list_paths(&self, plugin_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt =
            conn.prepare("SELECT path FROM files WHERE plugin_id = ?1 ORDER BY path")?;
        let paths = stmt
            .query_map(params![plugin_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    fn revisions(&self, plugin_id: &str, limit: usize) -> StoreResult<Vec<Revision>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, plugin_id, files, changed, message, applied_at
             FROM revisions WHERE plugin_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let revisions = stmt
            .query_map(params![plugin_id, limit as i64], |row| {
                Ok(Revision {
                    id: row.get::<_, i64>(0)? as u64,
                    plugin_id: row.get(1)?,
                    files: row.get::<_, i64>(2)? as usize,
                    changed: row.get::<_, i64>(3)? as usize,
                    message: row.get(4)?,
                    applied_at: row.get::<_, DateTime<Utc>>(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(revisions)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let (plugins, files): (i64, i64) = conn.query_row(
            "SELECT COUNT(DISTINCT plugin_id), COUNT(*) FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let revisions: i64 =
            conn.query_row("SELECT COUNT(*) FROM revisions", [], |row| row.get(0))?;

        Ok(StoreStats {
            plugins: plugins as usize,
            files: files as usize,
            revisions: revisions as usize,
        })
    }
}
