//! SurrealDB v2 SDK checkpoint storage implementation.

use anyhow::Result;
use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::sql::{Id, Thing};

use crate::store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// SurrealDB v2 SDK implementation of CheckpointStore trait.
///
/// Stores one record per state key in a SurrealDB table.
pub struct Surreal2Store {
    client: surrealdb::Surreal<Any>,
    table_name: String,
}

impl Surreal2Store {
    /// Create a new Surreal2Store with the given client and table name.
    pub fn new(client: surrealdb::Surreal<Any>, table_name: String) -> Self {
        Self { client, table_name }
    }

    /// Table checkpoints are stored in.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Record id of the checkpoint for `binding` in `table_name`.
    ///
    /// Exposed so sinks can upsert the checkpoint inside their own
    /// transaction.
    pub fn record_id(table_name: &str, binding: &str) -> Thing {
        Thing::from((table_name, Id::String(binding.to_string())))
    }
}

#[async_trait]
impl CheckpointStore for Surreal2Store {
    fn store_type(&self) -> &'static str {
        "surrealdb"
    }

    async fn store_checkpoint(&self, id: &CheckpointID, checkpoint_data: String) -> Result<()> {
        let thing = Self::record_id(&self.table_name, &id.binding);
        let stored = StoredCheckpoint::new(id, checkpoint_data);
        self.client
            .query("UPSERT $record_id CONTENT $content")
            .bind(("record_id", thing))
            .bind(("content", stored))
            .await?
            .check()?;
        Ok(())
    }

    async fn read_checkpoint(&self, binding: &str) -> Result<Option<StoredCheckpoint>> {
        let thing = Self::record_id(&self.table_name, binding);
        let mut response = self
            .client
            .query("SELECT * FROM $record_id")
            .bind(("record_id", thing))
            .await?;
        let checkpoints: Vec<StoredCheckpoint> = response.take(0)?;
        Ok(checkpoints.into_iter().next())
    }

    async fn delete_checkpoint(&self, binding: &str) -> Result<bool> {
        let thing = Self::record_id(&self.table_name, binding);
        let mut response = self
            .client
            .query("DELETE $record_id RETURN BEFORE")
            .bind(("record_id", thing))
            .await?;
        let deleted: Vec<StoredCheckpoint> = response.take(0)?;
        Ok(!deleted.is_empty())
    }

    async fn list_checkpoints(&self) -> Result<Vec<StoredCheckpoint>> {
        let mut response = self
            .client
            .query("SELECT * FROM type::table($table) ORDER BY binding")
            .bind(("table", self.table_name.clone()))
            .await?;
        let checkpoints: Vec<StoredCheckpoint> = response.take(0)?;
        Ok(checkpoints)
    }
}
