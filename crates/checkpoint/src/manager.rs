//! Typed access to binding checkpoints.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::store::{CheckpointID, CheckpointStore};
use crate::{Checkpoint, CheckpointFile};

/// Loads, saves and resets typed checkpoints on top of a [`CheckpointStore`].
#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn CheckpointStore>,
}

impl StateManager {
    /// Create a manager over `store`.
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Persist `checkpoint` under state key `binding`.
    pub async fn save<C: Checkpoint>(&self, binding: &str, checkpoint: &C) -> Result<()> {
        let data = Self::encode(binding, checkpoint)?;
        let id = CheckpointID::new(binding, C::STATE_TYPE);
        self.store
            .store_checkpoint(&id, data)
            .await
            .with_context(|| format!("Failed to store checkpoint for '{binding}'"))
    }

    /// Serialize `checkpoint` the way [`StateManager::save`] stores it.
    pub fn encode<C: Checkpoint>(binding: &str, checkpoint: &C) -> Result<String> {
        let file = CheckpointFile::new(binding, checkpoint)?;
        Ok(serde_json::to_string(&file)?)
    }

    /// Read the raw checkpoint file for `binding`.
    pub async fn read_file(&self, binding: &str) -> Result<Option<CheckpointFile>> {
        let Some(stored) = self.store.read_checkpoint(binding).await? else {
            return Ok(None);
        };
        let file: CheckpointFile = serde_json::from_str(&stored.checkpoint_data)
            .with_context(|| format!("Corrupt checkpoint data for '{binding}'"))?;
        Ok(Some(file))
    }

    /// Load the typed checkpoint for `binding`, if any.
    pub async fn load<C: Checkpoint>(&self, binding: &str) -> Result<Option<C>> {
        match self.read_file(binding).await? {
            Some(file) => Ok(Some(file.parse()?)),
            None => Ok(None),
        }
    }

    /// Delete the checkpoint for `binding`. Returns whether one existed.
    pub async fn reset(&self, binding: &str) -> Result<bool> {
        let existed = self.store.delete_checkpoint(binding).await?;
        if existed {
            tracing::info!(
                "Reset checkpoint for '{binding}' in {} store",
                self.store.store_type()
            );
        }
        Ok(existed)
    }

    /// All checkpoint files in the store.
    pub async fn list(&self) -> Result<Vec<CheckpointFile>> {
        self.store
            .list_checkpoints()
            .await?
            .into_iter()
            .map(|stored| {
                serde_json::from_str(&stored.checkpoint_data)
                    .with_context(|| format!("Corrupt checkpoint data for '{}'", stored.binding))
            })
            .collect()
    }
}
