//! Deletion inference for full-refresh bindings.
//!
//! Each completed full poll records the identities of the rows it saw.
//! Identities present in the previous snapshot and absent from the new one
//! belong to rows that were deleted, and get a tombstone document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use sync_core::{Document, Operation};

use crate::config::BindingConfig;
use crate::execute::document_meta;

/// Row identities observed by one completed full poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowIdentitySnapshot {
    /// Identity is the row's ordinal in the result; the poll saw `count` rows
    Ordinal { count: u64 },
    /// Identity is the JSON array of the identity column values
    Keys { keys: BTreeSet<String> },
}

impl RowIdentitySnapshot {
    /// Number of identities in the snapshot.
    pub fn len(&self) -> usize {
        match self {
            RowIdentitySnapshot::Ordinal { count } => *count as usize,
            RowIdentitySnapshot::Keys { keys } => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `identity` was observed.
    pub fn contains(&self, identity: &str) -> bool {
        match self {
            RowIdentitySnapshot::Ordinal { count } => identity
                .parse::<u64>()
                .map(|ordinal| ordinal < *count)
                .unwrap_or(false),
            RowIdentitySnapshot::Keys { keys } => keys.contains(identity),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RowIdentitySnapshot::Ordinal { .. } => "ordinal",
            RowIdentitySnapshot::Keys { .. } => "keys",
        }
    }
}

/// Identities in `previous` that are missing from `current`, in order.
///
/// Must only be called with the snapshot of a poll that completed
/// successfully. Snapshots of different kinds never reconcile.
pub fn reconcile(
    previous: Option<&RowIdentitySnapshot>,
    current: &RowIdentitySnapshot,
) -> Vec<String> {
    match (previous, current) {
        (None, _) => Vec::new(),
        (
            Some(RowIdentitySnapshot::Ordinal { count: before }),
            RowIdentitySnapshot::Ordinal { count: now },
        ) => (*now..*before).map(|ordinal| ordinal.to_string()).collect(),
        (Some(RowIdentitySnapshot::Keys { keys: before }), RowIdentitySnapshot::Keys { keys: now }) => {
            before.difference(now).cloned().collect()
        }
        (Some(prev), cur) => {
            tracing::warn!(
                "Row identity changed from {} to {}; skipping deletion inference for this poll",
                prev.kind(),
                cur.kind()
            );
            Vec::new()
        }
    }
}

/// Accumulates row identities during a full poll.
#[derive(Debug)]
pub struct SnapshotBuilder {
    ordinal: bool,
    count: u64,
    keys: BTreeSet<String>,
}

impl SnapshotBuilder {
    pub fn new(binding: &BindingConfig) -> Self {
        Self {
            ordinal: binding.identity_columns().is_empty(),
            count: 0,
            keys: BTreeSet::new(),
        }
    }

    /// Record one row; `identity` is ignored for ordinal snapshots.
    pub fn observe(&mut self, identity: &str) {
        self.count += 1;
        if !self.ordinal {
            self.keys.insert(identity.to_string());
        }
    }

    pub fn finish(self) -> RowIdentitySnapshot {
        if self.ordinal {
            RowIdentitySnapshot::Ordinal { count: self.count }
        } else {
            RowIdentitySnapshot::Keys { keys: self.keys }
        }
    }
}

/// Build one tombstone per missing identity.
///
/// Keyed identities are unpacked back into their column values, so the
/// tombstone carries the same identifying fields as the rows it deletes.
pub fn tombstones(binding: &BindingConfig, missing: &[String]) -> Vec<Document> {
    let columns = binding.identity_columns();
    missing
        .iter()
        .map(|identity| {
            let mut body = serde_json::Map::new();
            if !columns.is_empty() {
                if let Ok(serde_json::Value::Array(values)) =
                    serde_json::from_str::<serde_json::Value>(identity)
                {
                    for (column, value) in columns.iter().zip(values) {
                        body.insert(column.clone(), value);
                    }
                }
            }
            let row_id = if columns.is_empty() {
                identity.parse::<u64>().ok()
            } else {
                None
            };
            body.insert(
                "_meta".to_string(),
                document_meta(binding, row_id, Some(Operation::Delete)),
            );
            Document {
                binding: binding.name.clone(),
                key: Some(identity.clone()),
                op: Some(Operation::Delete),
                body: serde_json::Value::Object(body),
            }
        })
        .collect()
}
