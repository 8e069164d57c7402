//! In-memory checkpoint storage.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Process-local CheckpointStore. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, StoredCheckpoint>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StoredCheckpoint>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("Checkpoint memory store lock poisoned"))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        let stored = StoredCheckpoint::new(id, checkpoint_data);
        self.lock()?.insert(id.binding.clone(), stored);
        Ok(())
    }

    async fn read_checkpoint(&self, binding: &str) -> Result<Option<StoredCheckpoint>> {
        Ok(self.lock()?.get(binding).cloned())
    }

    async fn delete_checkpoint(&self, binding: &str) -> Result<bool> {
        Ok(self.lock()?.remove(binding).is_some())
    }

    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}
