//! Directory mirror plugin
//!
//! Publishes a local directory tree as the plugin's file set. Used by the
//! `push` command to upload prepared problem sets without writing a crawler.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{CrawlerPlugin, UpdateContext};
use crate::protocol::{FileBatch, FileContent};

/// Snapshots every file under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryPlugin {
    root: PathBuf,
}

impl DirectoryPlugin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the tree into a batch keyed by `/`-separated relative paths
    ///
    /// UTF-8 files travel as text, everything else as binary.
    pub fn snapshot(&self) -> anyhow::Result<FileBatch> {
        let mut batch = FileBatch::new();
        collect(&self.root, &self.root, &mut batch)?;
        Ok(batch)
    }
}

fn collect(root: &Path, dir: &Path, batch: &mut FileBatch) -> anyhow::Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect(root, &path, batch)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        let relative = path.strip_prefix(root)?;
        let Some(key) = virtual_path(relative) else {
            warn!(path = %path.display(), "Skipping file with non UTF-8 name");
            continue;
        };

        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        batch.insert(key, FileContent::from_bytes(bytes))?;
    }
    Ok(())
}

fn virtual_path(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

#[async_trait]
impl CrawlerPlugin for DirectoryPlugin {
    async fn start(&mut self) -> anyhow::Result<()> {
        if !self.root.is_dir() {
            bail!("{} is not a directory", self.root.display());
        }
        info!(root = %self.root.display(), "Mirroring directory");
        Ok(())
    }

    async fn update(&mut self, ctx: &UpdateContext<'_>) -> anyhow::Result<Option<FileBatch>> {
        let this = self.clone();
        let batch = tokio::task::spawn_blocking(move || this.snapshot()).await??;

        debug!(
            plugin_id = %ctx.info().id(),
            files = batch.len(),
            bytes = batch.total_bytes(),
            "Directory snapshot taken"
        );

        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch))
    }
}
