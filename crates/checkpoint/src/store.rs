//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus shared types.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint identifier for storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointID {
    /// State key of the binding (see [`state_key`])
    pub binding: String,
    /// Checkpoint type tag (e.g., "binding")
    pub state_type: String,
}

impl CheckpointID {
    /// Create an identifier.
    pub fn new(binding: impl Into<String>, state_type: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            state_type: state_type.into(),
        }
    }
}

/// Checkpoint data stored in backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCheckpoint {
    /// Serialized [`crate::CheckpointFile`]
    pub checkpoint_data: String,
    /// Checkpoint type tag for validation
    pub state_type: String,
    /// State key the checkpoint belongs to
    pub binding: String,
    /// Timestamp when checkpoint was written
    pub created_at: DateTime<Utc>,
}

impl StoredCheckpoint {
    /// Wrap serialized data for `id`, stamped with the current time.
    pub fn new(id: &CheckpointID, checkpoint_data: String) -> Self {
        Self {
            checkpoint_data,
            state_type: id.state_type.clone(),
            binding: id.binding.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Trait for checkpoint storage operations.
///
/// `store_checkpoint` must be atomic per key: after a crash a reader sees
/// either the previous checkpoint or the new one, never a torn write.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Backend identifier for logging.
    fn store_type(&self) -> &'static str;

    /// Store a checkpoint, replacing any previous one for the same key.
    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()>;

    /// Read a checkpoint from the storage backend.
    ///
    /// Returns None if the checkpoint doesn't exist.
    async fn read_checkpoint(&self, binding: &str) -> Result<Option<StoredCheckpoint>>;

    /// Delete a checkpoint. Returns whether one existed.
    async fn delete_checkpoint(&self, binding: &str) -> Result<bool>;

    /// List every stored checkpoint.
    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>>;
}

/// Derive the state key of a binding.
///
/// The binding name is percent-escaped so the key is safe as a file name and
/// a record id. A non-zero `backfill` counter appends `.v{n}`, so bumping
/// the counter abandons the old checkpoint and starts over.
pub fn state_key(binding_name: &str, backfill: u32) -> String {
    let mut key = String::with_capacity(binding_name.len());
    for b in binding_name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            key.push(b as char);
        } else {
            key.push_str(&format!("%{b:02X}"));
        }
    }
    if backfill > 0 {
        key.push_str(&format!(".v{backfill}"));
    }
    key
}
