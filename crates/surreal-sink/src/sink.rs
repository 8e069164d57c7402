//! Document writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use checkpoint::{CheckpointID, StoredCheckpoint, Surreal2Store};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use sync_core::{Document, DocumentSink};

const WRITE_BATCH: &str = r#"
BEGIN TRANSACTION;
FOR $d IN $docs {
    IF $d.action = 'delete' {
        DELETE type::thing($table, $d.key);
    } ELSE IF $d.action = 'upsert' {
        UPSERT type::thing($table, $d.key) CONTENT { doc: $d.body };
    } ELSE {
        CREATE type::table($table) CONTENT { doc: $d.body };
    };
};
IF $checkpoint_id != NONE {
    UPSERT $checkpoint_id CONTENT $checkpoint;
};
COMMIT TRANSACTION;
"#;

/// Writes documents, and optionally checkpoints, to SurrealDB.
#[derive(Clone)]
pub struct SurrealSink {
    client: Surreal<Any>,
    checkpoint_table: String,
}

impl SurrealSink {
    pub fn new(client: Surreal<Any>, checkpoint_table: impl Into<String>) -> Self {
        Self {
            client,
            checkpoint_table: checkpoint_table.into(),
        }
    }

    pub fn client(&self) -> &Surreal<Any> {
        &self.client
    }

    pub fn checkpoint_table(&self) -> &str {
        &self.checkpoint_table
    }

    /// Table the documents of `binding` are written to.
    ///
    /// The name is percent-escaped the same way as a state key, so two
    /// bindings never share a table.
    pub fn table_for(binding: &str) -> String {
        checkpoint::state_key(binding, 0)
    }

    /// Write `documents` and, if given, the checkpoint in one transaction.
    ///
    /// `checkpoint` is the state id plus the serialized checkpoint file, as
    /// produced by `StateManager::encode`.
    pub async fn write_batch(
        &self,
        binding: &str,
        documents: &[Document],
        checkpoint: Option<(&CheckpointID, String)>,
    ) -> Result<()> {
        let table = Self::table_for(binding);
        let docs: Vec<serde_json::Value> = documents.iter().map(document_action).collect();

        let (checkpoint_id, stored) = match checkpoint {
            Some((id, data)) => (
                Some(Surreal2Store::record_id(&self.checkpoint_table, &id.binding)),
                Some(StoredCheckpoint::new(id, data)),
            ),
            None => (None, None),
        };

        self.client
            .query(WRITE_BATCH)
            .bind(("table", table.clone()))
            .bind(("docs", docs))
            .bind(("checkpoint_id", checkpoint_id))
            .bind(("checkpoint", stored))
            .await
            .with_context(|| format!("SurrealDB write to '{table}' failed"))?
            .check()
            .with_context(|| format!("SurrealDB transaction on '{table}' failed"))?;

        tracing::debug!(
            "Wrote {} documents to SurrealDB table '{table}'",
            documents.len()
        );
        Ok(())
    }
}

fn document_action(doc: &Document) -> serde_json::Value {
    let action = match (&doc.key, doc.is_deletion()) {
        (Some(_), true) => "delete",
        (Some(_), false) => "upsert",
        (None, _) => "create",
    };
    serde_json::json!({
        "action": action,
        "key": doc.key.clone().unwrap_or_default(),
        "body": doc.body,
    })
}

#[async_trait]
impl DocumentSink for SurrealSink {
    fn sink_type(&self) -> &'static str {
        "surrealdb"
    }

    async fn check(&self) -> Result<()> {
        self.client
            .query("RETURN 1")
            .await
            .context("SurrealDB sink is unreachable")?
            .check()?;
        Ok(())
    }

    async fn append(&self, binding: &str, documents: &[Document]) -> Result<()> {
        self.write_batch(binding, documents, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{surreal_connect, SurrealOpts};
    use checkpoint::{CheckpointStore, Surreal2Store};
    use sync_core::Operation;

    fn doc(key: Option<&str>, op: Option<Operation>, id: i64) -> Document {
        Document {
            binding: "users".to_string(),
            key: key.map(str::to_string),
            op,
            body: serde_json::json!({ "id": id }),
        }
    }

    async fn read_docs(sink: &SurrealSink, table: &str) -> Vec<serde_json::Value> {
        let mut response = sink
            .client()
            .query("SELECT VALUE doc FROM type::table($table)")
            .bind(("table", table.to_string()))
            .await
            .unwrap();
        let mut docs: Vec<serde_json::Value> = response.take(0).unwrap();
        docs.sort_by_key(|d| d["id"].as_i64());
        docs
    }

    #[test]
    fn test_table_for_is_injective() {
        assert_eq!(SurrealSink::table_for("users"), "users");
        assert_eq!(SurrealSink::table_for("public.users"), "public%2Eusers");
        assert_eq!(SurrealSink::table_for("public_users"), "public_users");
        assert_ne!(
            SurrealSink::table_for("a%2Eb"),
            SurrealSink::table_for("a.b")
        );
    }

    #[tokio::test]
    async fn test_similar_binding_names_stay_apart() {
        let client = surreal_connect(&SurrealOpts::in_memory("test", "test"))
            .await
            .unwrap();
        let sink = SurrealSink::new(client, "state");

        sink.append("public.users", &[doc(Some("[1]"), None, 1)])
            .await
            .unwrap();
        sink.append(
            "public_users",
            &[doc(Some("[1]"), Some(Operation::Delete), 1)],
        )
        .await
        .unwrap();

        let table = SurrealSink::table_for("public.users");
        assert_eq!(read_docs(&sink, &table).await, vec![serde_json::json!({ "id": 1 })]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_deletes_apply() {
        let client = surreal_connect(&SurrealOpts::in_memory("test", "test"))
            .await
            .unwrap();
        let sink = SurrealSink::new(client, "state");

        let batch = vec![doc(Some("[1]"), None, 1), doc(Some("[2]"), None, 2)];
        sink.append("users", &batch).await.unwrap();
        sink.append("users", &batch).await.unwrap();
        assert_eq!(read_docs(&sink, "users").await.len(), 2);

        sink.append("users", &[doc(Some("[1]"), Some(Operation::Delete), 1)])
            .await
            .unwrap();
        let docs = read_docs(&sink, "users").await;
        assert_eq!(docs, vec![serde_json::json!({ "id": 2 })]);
    }

    #[tokio::test]
    async fn test_unkeyed_documents_are_created() {
        let client = surreal_connect(&SurrealOpts::in_memory("test", "test"))
            .await
            .unwrap();
        let sink = SurrealSink::new(client, "state");
        sink.append("events", &[doc(None, None, 1), doc(None, None, 1)])
            .await
            .unwrap();
        assert_eq!(read_docs(&sink, "events").await.len(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_written_with_batch() {
        let client = surreal_connect(&SurrealOpts::in_memory("test", "test"))
            .await
            .unwrap();
        let sink = SurrealSink::new(client.clone(), "state");
        let id = CheckpointID::new("users", "binding");

        sink.write_batch("users", &[doc(Some("[1]"), None, 1)], Some((&id, "{}".to_string())))
            .await
            .unwrap();

        let store = Surreal2Store::new(client, "state".to_string());
        let stored = store.read_checkpoint("users").await.unwrap().unwrap();
        assert_eq!(stored.checkpoint_data, "{}");
        assert_eq!(stored.state_type, "binding");
    }
}
