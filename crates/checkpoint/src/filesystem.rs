//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores one `{state_key}.json` file per binding. Writes go to a
/// temporary sibling which is synced and then renamed over the target.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, binding: &str) -> PathBuf {
        self.dir.join(format!("{binding}.json"))
    }

    fn read_path(path: &PathBuf) -> Result<StoredCheckpoint> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file {}", path.display()))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    fn store_type(&self) -> &'static str {
        "filesystem"
    }

    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let stored = StoredCheckpoint::new(id, checkpoint_data);
        let target = self.path_for(&id.binding);
        let tmp = self.dir.join(format!("{}.json.tmp", id.binding));

        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(&stored)?.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &target)?;

        tracing::debug!("Stored checkpoint to {}", target.display());
        Ok(())
    }

    async fn read_checkpoint(&self, binding: &str) -> Result<Option<StoredCheckpoint>> {
        let path = self.path_for(binding);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_path(&path)?))
    }

    async fn delete_checkpoint(&self, binding: &str) -> Result<bool> {
        let path = self.path_for(binding);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                checkpoints.push(Self::read_path(&path)?);
            }
        }
        checkpoints.sort_by(|a, b| a.binding.cmp(&b.binding));
        Ok(checkpoints)
    }
}
