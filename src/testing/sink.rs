use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sync_core::{Document, DocumentSink};

#[derive(Debug, Default)]
struct Inner {
    documents: BTreeMap<String, Vec<Document>>,
    fail_appends: u32,
    appends: u32,
    largest_append: usize,
}

/// Sink that keeps documents in memory, per binding, in append order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `n` appends.
    pub fn fail_next_appends(&self, n: u32) {
        self.lock().fail_appends = n;
    }

    /// Documents appended for `binding`.
    pub fn documents(&self, binding: &str) -> Vec<Document> {
        self.lock()
            .documents
            .get(binding)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of successful appends across all bindings.
    pub fn appends(&self) -> u32 {
        self.lock().appends
    }

    /// Size of the largest single append.
    pub fn largest_append(&self) -> usize {
        self.lock().largest_append
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    fn sink_type(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, binding: &str, documents: &[Document]) -> anyhow::Result<()> {
        let mut inner = self.lock();
        if inner.fail_appends > 0 {
            inner.fail_appends -= 1;
            anyhow::bail!("injected append failure");
        }
        inner.appends += 1;
        inner.largest_append = inner.largest_append.max(documents.len());
        inner
            .documents
            .entry(binding.to_string())
            .or_default()
            .extend_from_slice(documents);
        Ok(())
    }
}
