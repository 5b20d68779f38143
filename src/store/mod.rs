//! Backing store for accepted file batches
//!
//! A store keeps the latest content of every file per plugin namespace and
//! records one revision per applied batch. Applying a batch is atomic: either
//! every file lands or the call fails and nothing is visible.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::protocol::{FileBatch, FileContent};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a backing store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Store Types
// ============================================================================

/// Outcome of applying one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Files written (every file of the batch)
    pub files_applied: usize,

    /// Files whose content differs from what was stored before
    pub files_changed: usize,

    /// Revision recorded for the batch, `None` for an empty batch
    pub revision: Option<u64>,
}

/// Record of one applied batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: u64,
    pub plugin_id: String,
    pub files: usize,
    pub changed: usize,
    pub message: String,
    pub applied_at: DateTime<Utc>,
}

/// Store-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub plugins: usize,
    pub files: usize,
    pub revisions: usize,
}

/// Backing store for plugin file batches
///
/// Implementations are synchronous; the coordinator calls them from a
/// blocking task.
pub trait BatchStore: Send + Sync {
    /// Apply a whole batch to the plugin's namespace
    fn apply(&self, plugin_id: &str, batch: &FileBatch) -> StoreResult<ApplyOutcome>;

    /// Latest content of one file
    fn get(&self, plugin_id: &str, path: &str) -> StoreResult<Option<FileContent>>;

    /// Latest content of one text file, `None` when absent or binary
    fn get_text(&self, plugin_id: &str, path: &str) -> StoreResult<Option<String>> {
        Ok(self.get(plugin_id, path)?.and_then(|content| match content {
            FileContent::Text(text) => Some(text),
            FileContent::Binary { .. } => None,
        }))
    }

    /// All paths stored for a plugin, sorted
    fn list_paths(&self, plugin_id: &str) -> StoreResult<Vec<String>>;

    /// Revisions of a plugin, newest first
    fn revisions(&self, plugin_id: &str, limit: usize) -> StoreResult<Vec<Revision>>;

    /// Store-wide counters
    fn stats(&self) -> StoreResult<StoreStats>;
}

/// Shared handle to a store
pub type SharedStore = Arc<dyn BatchStore>;

// ============================================================================
// Store Configuration
// ============================================================================

/// Which backing store the coordinator uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local map, lost on restart
    Memory,

    /// SQLite database file
    Sqlite { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("data/archive.db"),
        }
    }
}

impl StoreConfig {
    /// Open the configured store
    pub fn open(&self) -> StoreResult<SharedStore> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryStore::new())),
            Self::Sqlite { path } => Ok(Arc::new(SqliteStore::new(path)?)),
        }
    }
}

/// SHA-256 of file content, hex encoded
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Revision message for a batch
pub(crate) fn revision_message(plugin_id: &str, at: DateTime<Utc>) -> String {
    format!("Problemset {plugin_id} updated: {}", at.to_rfc3339())
}
