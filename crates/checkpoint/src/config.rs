//! Checkpoint storage configuration.

use serde::{Deserialize, Serialize};

/// Default directory for filesystem checkpoints.
pub const DEFAULT_CHECKPOINT_DIR: &str = ".batch-capture-state";

/// Default SurrealDB table for checkpoints.
pub const DEFAULT_CHECKPOINT_TABLE: &str = "batch_capture_state";

/// Where binding checkpoints are persisted.
///
/// ```yaml
/// checkpoint:
///   type: filesystem
///   dir: /var/lib/batch-capture
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointStorage {
    /// One JSON file per binding under `dir`
    Filesystem {
        #[serde(default = "default_dir")]
        dir: String,
    },
    /// One record per binding in a SurrealDB table
    #[serde(rename = "surrealdb")]
    SurrealDB {
        #[serde(default = "default_table")]
        table_name: String,
    },
    /// Process memory only
    Memory,
}

fn default_dir() -> String {
    DEFAULT_CHECKPOINT_DIR.to_string()
}

fn default_table() -> String {
    DEFAULT_CHECKPOINT_TABLE.to_string()
}

impl Default for CheckpointStorage {
    fn default() -> Self {
        CheckpointStorage::Filesystem { dir: default_dir() }
    }
}
