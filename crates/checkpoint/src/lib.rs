//! Checkpoint persistence for batch-capture.
//!
//! Every binding owns one checkpoint, addressed by its *state key*. A
//! checkpoint is any type implementing [`Checkpoint`]; it is wrapped in a
//! [`CheckpointFile`] for storage-agnostic serialization and written to a
//! [`CheckpointStore`] backend through a [`StateManager`].
//!
//! ## Storage Backends
//!
//! - [`FilesystemStore`] - One JSON file per state key, replaced atomically
//! - [`Surreal2Store`] - One record per state key in a SurrealDB table
//! - [`MemoryStore`] - Process-local map, used by tests and `--once` dry runs
//!
//! Writes of different state keys never touch each other, so bindings can
//! commit concurrently.

mod config;
mod file;
mod filesystem;
mod manager;
mod memory;
pub mod store;
mod surreal2;


pub use config::CheckpointStorage;
pub use file::CheckpointFile;
pub use filesystem::FilesystemStore;
pub use manager::StateManager;
pub use memory::MemoryStore;
pub use store::{state_key, CheckpointID, CheckpointStore, StoredCheckpoint};
pub use surreal2::Surreal2Store;

/// Trait implemented by persisted checkpoint types.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Offset {
///     pub position: i64,
/// }
///
/// impl Checkpoint for Offset {
///     const STATE_TYPE: &'static str = "offset";
///
///     fn to_cli_string(&self) -> String {
///         self.position.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self { position: s.parse()? })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync {
    /// Type tag stored alongside the data and validated on load.
    const STATE_TYPE: &'static str;

    /// One-line summary printed by `state show`.
    fn to_cli_string(&self) -> String;

    /// Parse a checkpoint supplied on the command line.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>;
}
