use anyhow::{Context, Result};
use async_trait::async_trait;
use checkpoint::state_key;
use std::path::{Path, PathBuf};
use sync_core::{Document, DocumentSink};
use tokio::io::AsyncWriteExt;

/// Appends documents to one JSON Lines file per binding.
///
/// Each append is flushed and synced before it returns, so a document
/// reported as appended survives a crash.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File the documents of `binding` are appended to.
    pub fn path_for(&self, binding: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", state_key(binding, 0)))
    }
}

#[async_trait]
impl DocumentSink for JsonlSink {
    fn sink_type(&self) -> &'static str {
        "jsonl"
    }

    async fn check(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create sink directory {}", self.dir.display()))
    }

    async fn append(&self, binding: &str, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for doc in documents {
            serde_json::to_writer(&mut buf, &doc.body)?;
            buf.push(b'\n');
        }

        let path = self.path_for(binding);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(&buf)
            .await
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        file.flush().await?;
        file.sync_data().await?;

        tracing::debug!(
            "Appended {} documents to {}",
            documents.len(),
            path.display()
        );
        Ok(())
    }
}
