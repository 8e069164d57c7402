//! Per-binding persisted state.

use checkpoint::Checkpoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use sync_core::{compare_tuples, Value};

use crate::config::BindingConfig;
use crate::deletion::RowIdentitySnapshot;

/// Cursor watermark: one value per cursor column, empty before the first
/// commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub values: Vec<Value>,
}

/// The cursor tuple changed kind between polls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cursor value {proposed} cannot be compared with persisted cursor {current}")]
pub struct IncomparableCursor {
    pub current: String,
    pub proposed: String,
}

impl CursorState {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The later of `self` and `proposed`.
    ///
    /// The persisted cursor never moves backwards: a proposal below the
    /// current value (a row that regressed, or a clock skew on the source)
    /// leaves the state as it is.
    pub fn advance(&self, proposed: &CursorState) -> Result<CursorState, IncomparableCursor> {
        if proposed.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(proposed.clone());
        }
        match compare_tuples(&proposed.values, &self.values) {
            Some(Ordering::Greater) => Ok(proposed.clone()),
            Some(_) => Ok(self.clone()),
            None => Err(IncomparableCursor {
                current: self.to_string(),
                proposed: proposed.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for CursorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let literals: Vec<String> = self.values.iter().map(|v| v.to_sql_literal()).collect();
        write!(f, "({})", literals.join(", "))
    }
}

/// What a binding has captured so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    /// Cursor-incremental binding
    Cursor(CursorState),
    /// Full-refresh binding; the snapshot is kept only when deletions are
    /// inferred
    Snapshot(Option<RowIdentitySnapshot>),
}

/// Persisted unit of state for one binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingCheckpoint {
    pub progress: Progress,
    /// Start of the last successful poll
    #[serde(default)]
    pub last_polled: Option<DateTime<Utc>>,
}

impl BindingCheckpoint {
    /// Empty state for `binding`.
    pub fn initial(binding: &BindingConfig) -> Self {
        let progress = if binding.is_full_refresh() {
            Progress::Snapshot(None)
        } else {
            Progress::Cursor(CursorState::default())
        };
        Self {
            progress,
            last_polled: None,
        }
    }

    pub fn cursor(&self) -> Option<&CursorState> {
        match &self.progress {
            Progress::Cursor(c) => Some(c),
            Progress::Snapshot(_) => None,
        }
    }

    pub fn snapshot(&self) -> Option<&RowIdentitySnapshot> {
        match &self.progress {
            Progress::Snapshot(s) => s.as_ref(),
            Progress::Cursor(_) => None,
        }
    }

    /// One-line description of the progress, for logs.
    pub fn progress_summary(&self) -> String {
        match &self.progress {
            Progress::Cursor(c) if c.is_empty() => "cursor=<none>".to_string(),
            Progress::Cursor(c) => format!("cursor={c}"),
            Progress::Snapshot(None) => "snapshot=<none>".to_string(),
            Progress::Snapshot(Some(s)) => format!("snapshot={} rows", s.len()),
        }
    }

    /// Whether the stored progress fits the binding's current mode.
    pub fn matches(&self, binding: &BindingConfig) -> bool {
        match &self.progress {
            Progress::Cursor(c) => {
                !binding.is_full_refresh() && (c.is_empty() || c.values.len() == binding.cursor.len())
            }
            Progress::Snapshot(_) => binding.is_full_refresh(),
        }
    }
}

impl Checkpoint for BindingCheckpoint {
    const STATE_TYPE: &'static str = "binding";

    fn to_cli_string(&self) -> String {
        let progress = self.progress_summary();
        match self.last_polled {
            Some(t) => format!("{progress} last_polled={}", t.to_rfc3339()),
            None => progress,
        }
    }

    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}
