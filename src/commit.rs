//! Checkpoint commit protocol.
//!
//! A poll's documents are appended to the sink before the checkpoint that
//! covers them is stored, so a crash between the two replays documents on
//! restart but never skips them. When documents and state share one
//! SurrealDB database, both are written in a single transaction instead.

use async_trait::async_trait;
use checkpoint::{Checkpoint, CheckpointID, StateManager};
use std::sync::Arc;
use surreal_sink::SurrealSink;
use sync_core::{Document, DocumentSink};

use crate::state::BindingCheckpoint;

/// Why a commit failed.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// Sink or state store unreachable; the poll is retried
    #[error("{0}")]
    Unavailable(String),

    /// State cannot be serialized or the store is corrupt
    #[error("{0}")]
    Fatal(String),
}

/// Atomically-ordered durability for one binding's poll output.
#[async_trait]
pub trait Committer: Send + Sync {
    /// Verify the sink and state store before capture starts.
    async fn check(&self) -> Result<(), CommitError>;

    /// Make `documents` durable without touching the checkpoint.
    async fn append(&self, binding: &str, documents: &[Document]) -> Result<(), CommitError>;

    /// Make `documents` durable, then `checkpoint` under `state_key`.
    async fn commit(
        &self,
        binding: &str,
        state_key: &str,
        documents: &[Document],
        checkpoint: &BindingCheckpoint,
    ) -> Result<(), CommitError>;
}

/// Appends to a [`DocumentSink`], then advances the state store.
pub struct AppendThenAdvance {
    sink: Arc<dyn DocumentSink>,
    state: StateManager,
}

impl AppendThenAdvance {
    pub fn new(sink: Arc<dyn DocumentSink>, state: StateManager) -> Self {
        Self { sink, state }
    }
}

#[async_trait]
impl Committer for AppendThenAdvance {
    async fn check(&self) -> Result<(), CommitError> {
        self.sink
            .check()
            .await
            .map_err(|e| CommitError::Unavailable(format!("{} sink: {e:#}", self.sink.sink_type())))?;
        self.state
            .store()
            .list_checkpoints()
            .await
            .map_err(|e| CommitError::Unavailable(format!("state store: {e:#}")))?;
        Ok(())
    }

    async fn append(&self, binding: &str, documents: &[Document]) -> Result<(), CommitError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.sink
            .append(binding, documents)
            .await
            .map_err(|e| CommitError::Unavailable(format!("append failed: {e:#}")))
    }

    async fn commit(
        &self,
        binding: &str,
        state_key: &str,
        documents: &[Document],
        checkpoint: &BindingCheckpoint,
    ) -> Result<(), CommitError> {
        // Encode first: a checkpoint that cannot be serialized must not be
        // preceded by an append.
        StateManager::encode(state_key, checkpoint)
            .map_err(|e| CommitError::Fatal(format!("cannot encode checkpoint: {e:#}")))?;

        self.append(binding, documents).await?;
        self.state
            .save(state_key, checkpoint)
            .await
            .map_err(|e| CommitError::Unavailable(format!("checkpoint write failed: {e:#}")))?;

        tracing::debug!(
            "Committed {} documents for binding '{binding}': {}",
            documents.len(),
            checkpoint.to_cli_string()
        );
        Ok(())
    }
}

/// Writes documents and checkpoint in one SurrealDB transaction.
pub struct SurrealCommitter {
    sink: SurrealSink,
}

impl SurrealCommitter {
    pub fn new(sink: SurrealSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Committer for SurrealCommitter {
    async fn check(&self) -> Result<(), CommitError> {
        self.sink
            .check()
            .await
            .map_err(|e| CommitError::Unavailable(format!("{e:#}")))
    }

    async fn append(&self, binding: &str, documents: &[Document]) -> Result<(), CommitError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.sink
            .write_batch(binding, documents, None)
            .await
            .map_err(|e| CommitError::Unavailable(format!("{e:#}")))
    }

    async fn commit(
        &self,
        binding: &str,
        state_key: &str,
        documents: &[Document],
        checkpoint: &BindingCheckpoint,
    ) -> Result<(), CommitError> {
        let data = StateManager::encode(state_key, checkpoint)
            .map_err(|e| CommitError::Fatal(format!("cannot encode checkpoint: {e:#}")))?;
        let id = CheckpointID::new(state_key, BindingCheckpoint::STATE_TYPE);
        self.sink
            .write_batch(binding, documents, Some((&id, data)))
            .await
            .map_err(|e| CommitError::Unavailable(format!("{e:#}")))?;
        tracing::debug!(
            "Committed {} documents with checkpoint for binding '{binding}' in one transaction",
            documents.len()
        );
        Ok(())
    }
}
