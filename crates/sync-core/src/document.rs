//! Emitted documents and the sink they are appended to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Change operation carried in `_meta.op`, when it can be inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Row identity absent from the previous snapshot
    #[serde(rename = "c")]
    Create,
    /// Row no longer present
    #[serde(rename = "d")]
    Delete,
}

impl Operation {
    /// Single-letter form used in documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Delete => "d",
        }
    }
}

/// A JSON document derived from one source row (or one inferred deletion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Binding that produced the document
    pub binding: String,
    /// Deduplication key; `None` when the binding has no key
    pub key: Option<String>,
    /// Operation, when inferable
    pub op: Option<Operation>,
    /// Document body, including its `_meta` object
    pub body: serde_json::Value,
}

impl Document {
    /// Whether this document is a deletion tombstone.
    pub fn is_deletion(&self) -> bool {
        self.op == Some(Operation::Delete)
    }
}

/// Durable, ordered destination of emitted documents.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Sink type identifier (e.g., "jsonl", "surrealdb").
    fn sink_type(&self) -> &'static str;

    /// Verify the sink is reachable. Called once at capture startup.
    async fn check(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Durably append documents for one binding.
    ///
    /// Must not return `Ok` before the documents survive a crash.
    async fn append(&self, binding: &str, documents: &[Document]) -> anyhow::Result<()>;
}
