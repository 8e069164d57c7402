//! Checkpoint file wrapper for storage-agnostic serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Checkpoint;

/// Storage-agnostic checkpoint file wrapper.
///
/// # File Format
///
/// ```json
/// {
///     "state_type": "binding",
///     "binding": "public%2Eusers",
///     "checkpoint": { "progress": { "cursor": { "values": [...] } } },
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Checkpoint type tag
    pub state_type: String,
    /// State key the checkpoint belongs to
    pub binding: String,
    /// Serialized checkpoint data as JSON Value
    pub checkpoint: serde_json::Value,
    /// Timestamp when this checkpoint file was created
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    /// Create a checkpoint file for `binding`.
    pub fn new<C: Checkpoint>(binding: &str, checkpoint: &C) -> anyhow::Result<Self> {
        Ok(Self {
            state_type: C::STATE_TYPE.to_string(),
            binding: binding.to_string(),
            checkpoint: serde_json::to_value(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// Parse checkpoint into its concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The `state_type` doesn't match `C::STATE_TYPE`
    /// - The checkpoint data can't be deserialized into type `C`
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.state_type != C::STATE_TYPE {
            anyhow::bail!(
                "Checkpoint type mismatch for '{}': expected '{}', found '{}'",
                self.binding,
                C::STATE_TYPE,
                self.state_type
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }
}
