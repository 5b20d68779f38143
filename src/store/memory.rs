//! In-memory batch store
//!
//! Useful for tests and for coordinators that only relay batches.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{
    content_hash, revision_message, ApplyOutcome, BatchStore, Revision, StoreError, StoreResult,
    StoreStats,
};
use crate::protocol::{FileBatch, FileContent};

#[derive(Debug, Clone)]
struct StoredFile {
    content: FileContent,
    hash: String,
}

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<String, BTreeMap<String, StoredFile>>,
    revisions: Vec<Revision>,
}

/// Process-local store guarded by a single lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for MemoryStore {
    fn apply(&self, plugin_id: &str, batch: &FileBatch) -> StoreResult<ApplyOutcome> {
        if batch.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        // The write lock is held for the whole batch, so readers never see a
        // partially applied batch.
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let namespace = inner.files.entry(plugin_id.to_string()).or_default();

        let mut changed = 0;
        for (path, content) in batch.iter() {
            let hash = content_hash(content.as_bytes());
            let unchanged = namespace
                .get(path)
                .is_some_and(|f| f.hash == hash && f.content.is_binary() == content.is_binary());
            if !unchanged {
                changed += 1;
                namespace.insert(
                    path.to_string(),
                    StoredFile {
                        content: content.clone(),
                        hash,
                    },
                );
            }
        }

        let now = Utc::now();
        let id = inner.revisions.len() as u64 + 1;
        inner.revisions.push(Revision {
            id,
            plugin_id: plugin_id.to_string(),
            files: batch.len(),
            changed,
            message: revision_message(plugin_id, now),
            applied_at: now,
        });

        Ok(ApplyOutcome {
            files_applied: batch.len(),
            files_changed: changed,
            revision: Some(id),
        })
    }

    fn get(&self, plugin_id: &str, path: &str) -> StoreResult<Option<FileContent>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .files
            .get(plugin_id)
            .and_then(|ns| ns.get(path))
            .map(|f| f.content.clone()))
    }

    fn list_paths(&self, plugin_id: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .files
            .get(plugin_id)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn revisions(&self, plugin_id: &str, limit: usize) -> StoreResult<Vec<Revision>> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .revisions
            .iter()
            .rev()
            .filter(|r| r.plugin_id == plugin_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(StoreStats {
            plugins: inner.files.len(),
            files: inner.files.values().map(BTreeMap::len).sum(),
            revisions: inner.revisions.len(),
        })
    }
}
