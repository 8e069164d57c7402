use anyhow::Result;
use async_trait::async_trait;
use checkpoint::{CheckpointID, CheckpointStore, StoredCheckpoint};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Checkpoint store wrapper whose writes can be made to fail.
#[derive(Clone)]
pub struct FaultyStore {
    inner: Arc<dyn CheckpointStore>,
    fail_stores: Arc<AtomicU32>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inner,
            fail_stores: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Fail the next `n` checkpoint writes.
    pub fn fail_next_stores(&self, n: u32) {
        self.fail_stores.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for FaultyStore {
    fn store_type(&self) -> &'static str {
        self.inner.store_type()
    }

    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        let armed = self
            .fail_stores
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            anyhow::bail!("injected checkpoint write failure for '{}'", id.binding);
        }
        self.inner.store_checkpoint(id, checkpoint_data).await
    }

    async fn read_checkpoint(&self, binding: &str) -> Result<Option<StoredCheckpoint>> {
        self.inner.read_checkpoint(binding).await
    }

    async fn delete_checkpoint(&self, binding: &str) -> Result<bool> {
        self.inner.delete_checkpoint(binding).await
    }

    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>> {
        self.inner.list_checkpoints().await
    }
}
