//! Poll execution.
//!
//! Runs a rendered query on a fresh session, streams the rows, and turns
//! each into a [`Document`] while tracking the highest cursor tuple seen.
//! The fetch phase (connect, query, streaming) is bounded by the poll
//! timeout and aborted by shutdown; commits are never interrupted.

use futures::StreamExt;
use std::cmp::Ordering;
use std::future::Future;
use std::time::Duration;
use sync_core::{
    compare_tuples, Document, Operation, Query, Row, SourceConnector, SourceError,
    TimezonePolicy, Value,
};
use tokio_util::sync::CancellationToken;

use crate::commit::{CommitError, Committer};
use crate::config::BindingConfig;
use crate::deletion::{RowIdentitySnapshot, SnapshotBuilder};
use crate::error::CaptureError;
use crate::render::RenderError;
use crate::state::{BindingCheckpoint, CursorState, Progress};

/// Failure of one poll.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("column '{0}' is missing from the query result")]
    MissingColumn(String),

    #[error("unsupported schema change: {0}")]
    SchemaChange(String),

    #[error("poll exceeded its timeout of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("poll cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Commit(#[from] CommitError),
}

impl ExecuteError {
    /// Classify the failure for `binding`.
    pub fn classify(self, binding: &str) -> CaptureError {
        match self {
            ExecuteError::Source(e) if e.is_transient() => CaptureError::transient(binding, e),
            ExecuteError::Source(e) => CaptureError::config(binding, e),
            ExecuteError::Render(e) => CaptureError::config(binding, e),
            ExecuteError::MissingColumn(_) => CaptureError::config(binding, self),
            ExecuteError::SchemaChange(_) => CaptureError::fatal(binding, self),
            ExecuteError::Timeout(_) | ExecuteError::Cancelled => {
                CaptureError::transient(binding, self)
            }
            ExecuteError::Commit(CommitError::Unavailable(e)) => {
                CaptureError::transient(binding, format!("commit failed: {e}"))
            }
            ExecuteError::Commit(CommitError::Fatal(e)) => {
                CaptureError::capture(format!("binding '{binding}': commit failed: {e}"))
            }
        }
    }
}

/// The `_meta` object attached to every document.
///
/// Only facts derived from the row and the binding go here, so polling an
/// unchanged table yields the same bytes every time. Poll timestamps live in
/// the checkpoint and the logs.
pub fn document_meta(
    binding: &BindingConfig,
    row_id: Option<u64>,
    op: Option<Operation>,
) -> serde_json::Value {
    let mut meta = serde_json::json!({
        "binding": binding.name,
        "source": {
            "schema": binding.schema,
            "table": binding.table,
        },
    });
    if let Some(obj) = meta.as_object_mut() {
        if let Some(row_id) = row_id {
            obj.insert("row_id".to_string(), row_id.into());
        }
        if let Some(op) = op {
            obj.insert("op".to_string(), op.as_str().into());
        }
    }
    meta
}

/// Turns rows into documents and proposes the next cursor.
pub struct RowTranslator<'a> {
    binding: &'a BindingConfig,
    tz: &'a TimezonePolicy,
    floor: &'a [Value],
    previous: Option<&'a RowIdentitySnapshot>,
    identities: Option<SnapshotBuilder>,
    index: u64,
    max_cursor: Option<Vec<Value>>,
    ordered: bool,
    null_cursor_rows: u64,
}

/// What a translator saw over a whole poll.
#[derive(Debug)]
pub struct TranslatorSummary {
    pub rows: u64,
    pub proposed: CursorState,
    pub snapshot: Option<RowIdentitySnapshot>,
    pub null_cursor_rows: u64,
}

impl<'a> RowTranslator<'a> {
    pub fn new(
        binding: &'a BindingConfig,
        checkpoint: &'a BindingCheckpoint,
        tz: &'a TimezonePolicy,
    ) -> Self {
        let floor = checkpoint
            .cursor()
            .map(|c| c.values.as_slice())
            .unwrap_or_default();
        let previous = if binding.infer_deletions {
            checkpoint.snapshot()
        } else {
            None
        };
        Self {
            binding,
            tz,
            floor,
            previous,
            identities: binding.is_full_refresh().then(|| SnapshotBuilder::new(binding)),
            index: 0,
            max_cursor: None,
            ordered: true,
            null_cursor_rows: 0,
        }
    }

    /// Highest cursor tuple seen so far.
    pub fn max_cursor(&self) -> CursorState {
        CursorState::new(self.max_cursor.clone().unwrap_or_default())
    }

    /// Whether rows so far arrived in cursor order.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Number of rows translated so far.
    pub fn rows(&self) -> u64 {
        self.index
    }

    fn column_values(&self, row: &Row, columns: &[String]) -> Result<Vec<Value>, ExecuteError> {
        columns
            .iter()
            .map(|c| {
                row.get(c)
                    .cloned()
                    .ok_or_else(|| ExecuteError::MissingColumn(c.clone()))
            })
            .collect()
    }

    fn json_array(&self, values: &[Value]) -> String {
        let json: Vec<serde_json::Value> = values.iter().map(|v| v.to_json(self.tz)).collect();
        serde_json::Value::Array(json).to_string()
    }

    fn track_cursor(&mut self, row: &Row) -> Result<(), ExecuteError> {
        let values = self.column_values(row, &self.binding.cursor)?;
        if values.iter().any(Value::is_null) {
            self.null_cursor_rows += 1;
            tracing::debug!(
                "Row {} of binding '{}' has a NULL cursor value; it does not move the cursor",
                self.index,
                self.binding.name
            );
            return Ok(());
        }

        if !self.floor.is_empty() && compare_tuples(&values, self.floor).is_none() {
            return Err(ExecuteError::SchemaChange(format!(
                "cursor value {} cannot be compared with persisted cursor {}",
                CursorState::new(values),
                CursorState::new(self.floor.to_vec())
            )));
        }

        match &self.max_cursor {
            None => self.max_cursor = Some(values),
            Some(max) => match compare_tuples(&values, max) {
                Some(Ordering::Greater) => self.max_cursor = Some(values),
                Some(Ordering::Equal) => {}
                Some(Ordering::Less) => self.ordered = false,
                None => {
                    return Err(ExecuteError::SchemaChange(format!(
                        "cursor value {} changed kind within one poll",
                        CursorState::new(values)
                    )))
                }
            },
        }
        Ok(())
    }

    /// Translate one row into a document.
    pub fn translate(&mut self, row: Row) -> Result<Document, ExecuteError> {
        let index = self.index;

        if !self.binding.cursor.is_empty() {
            self.track_cursor(&row)?;
        }

        let identity = if self.identities.is_some() {
            let columns = self.binding.identity_columns();
            Some(if columns.is_empty() {
                index.to_string()
            } else {
                self.json_array(&self.column_values(&row, columns)?)
            })
        } else {
            None
        };

        let key = if !self.binding.key.is_empty() {
            Some(self.json_array(&self.column_values(&row, &self.binding.key)?))
        } else {
            identity.clone()
        };

        // Unchanged rows cannot be told apart from updated ones, so only
        // new identities are tagged.
        let op = match (self.previous, &identity) {
            (Some(previous), Some(identity)) if !previous.contains(identity) => {
                Some(Operation::Create)
            }
            _ => None,
        };

        if let (Some(builder), Some(identity)) = (self.identities.as_mut(), &identity) {
            builder.observe(identity);
        }

        let row_id = (self.identities.is_some() && self.binding.identity_columns().is_empty())
            .then_some(index);
        let mut body = row.to_json_map(self.tz);
        body.insert("_meta".to_string(), document_meta(self.binding, row_id, op));

        self.index += 1;
        Ok(Document {
            binding: self.binding.name.clone(),
            key,
            op,
            body: serde_json::Value::Object(body),
        })
    }

    pub fn finish(self) -> TranslatorSummary {
        TranslatorSummary {
            rows: self.index,
            proposed: CursorState::new(self.max_cursor.unwrap_or_default()),
            snapshot: self.identities.map(SnapshotBuilder::finish),
            null_cursor_rows: self.null_cursor_rows,
        }
    }
}

/// Inputs of one poll.
pub struct PollContext<'a> {
    pub binding: &'a BindingConfig,
    pub state_key: &'a str,
    pub query: &'a Query,
    /// Persisted state; replaced after each intermediate commit
    pub checkpoint: &'a mut BindingCheckpoint,
    pub timezone: &'a TimezonePolicy,
    pub poll_timeout: Duration,
}

/// Documents and proposals of a successfully fetched poll, not yet
/// committed.
#[derive(Debug)]
pub struct PollOutput {
    /// Documents not yet written to the sink
    pub documents: Vec<Document>,
    pub summary: TranslatorSummary,
    pub intermediate_commits: u32,
    /// Full-refresh chunks appended to the sink ahead of the final commit
    pub flushed_chunks: u32,
    /// Most documents held in memory at once
    pub peak_buffered: usize,
}

/// Deadline `timeout` after `start`; timeouts past the clock's range never
/// fire.
fn poll_deadline(start: tokio::time::Instant, timeout: Duration) -> tokio::time::Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + Duration::from_secs(86400 * 365 * 30))
}

/// Await `fut` unless the poll times out or the capture shuts down.
async fn fetch_step<F: Future>(
    fut: F,
    deadline: tokio::time::Instant,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<F::Output, ExecuteError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecuteError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Err(ExecuteError::Timeout(timeout)),
        out = fut => Ok(out),
    }
}

/// Execute one poll up to, but excluding, its final commit.
///
/// At most [`BindingConfig::batch_rows`] documents are held before they
/// leave memory. Cursor bindings commit an intermediate batch once it is
/// full and the cursor moves past its last value, so no cursor value is
/// ever split across commits. Full-refresh bindings append full chunks to
/// the sink and leave the snapshot to the final commit; a poll that fails
/// afterwards redelivers those rows and infers no deletions.
pub async fn execute(
    connector: &dyn SourceConnector,
    committer: &dyn Committer,
    ctx: PollContext<'_>,
    cancel: &CancellationToken,
) -> Result<PollOutput, ExecuteError> {
    let PollContext {
        binding,
        state_key,
        query,
        checkpoint,
        timezone,
        poll_timeout,
    } = ctx;
    let deadline = poll_deadline(tokio::time::Instant::now(), poll_timeout);
    let chunk = binding.batch_rows();

    tracing::debug!("Binding '{}' query: {}", binding.name, query.inline());

    let mut session = fetch_step(connector.connect(), deadline, poll_timeout, cancel).await??;
    let mut stream = fetch_step(session.query(query), deadline, poll_timeout, cancel).await??;

    // The translator reads the state as of poll start; intermediate
    // commits replace `checkpoint` as they land.
    let start_state = checkpoint.clone();
    let mut translator = RowTranslator::new(binding, &start_state, timezone);

    let mut batch = Vec::new();
    let mut flush_pending = false;
    let mut intermediate_commits = 0;
    let mut flushed_chunks = 0;
    let mut peak_buffered = 0;

    while let Some(item) = fetch_step(stream.next(), deadline, poll_timeout, cancel).await? {
        let row = item?;
        let before = translator.max_cursor();
        let document = translator.translate(row)?;

        if flush_pending {
            if !translator.is_ordered() {
                tracing::warn!(
                    "Binding '{}' returned rows out of cursor order; intermediate commits disabled for this poll",
                    binding.name
                );
                flush_pending = false;
            } else if translator.max_cursor() != before {
                let base = checkpoint.cursor().cloned().unwrap_or_default();
                let advanced = base
                    .advance(&before)
                    .map_err(|e| ExecuteError::SchemaChange(e.to_string()))?;
                let next = BindingCheckpoint {
                    progress: Progress::Cursor(advanced),
                    last_polled: checkpoint.last_polled,
                };
                committer
                    .commit(&binding.name, state_key, &batch, &next)
                    .await?;
                tracing::info!(
                    "Binding '{}' committed {} documents mid-poll at cursor {}",
                    binding.name,
                    batch.len(),
                    before
                );
                *checkpoint = next;
                batch.clear();
                flush_pending = false;
                intermediate_commits += 1;
            }
        }

        batch.push(document);
        peak_buffered = peak_buffered.max(batch.len());
        if batch.len() < chunk {
            continue;
        }
        if binding.is_full_refresh() {
            committer.append(&binding.name, &batch).await?;
            tracing::debug!(
                "Binding '{}' appended a chunk of {} documents",
                binding.name,
                batch.len()
            );
            batch.clear();
            flushed_chunks += 1;
        } else if translator.is_ordered() {
            flush_pending = true;
        }
    }
    drop(stream);
    drop(session);

    let summary = translator.finish();

    Ok(PollOutput {
        documents: batch,
        summary,
        intermediate_commits,
        flushed_chunks,
        peak_buffered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::AppendThenAdvance;
    use crate::render::QueryRenderer;
    use crate::testing::{MemorySink, MemorySource};
    use checkpoint::{MemoryStore, StateManager};
    use std::sync::Arc;
    use sync_core::Dialect;

    fn row(id: i64, updated: &str) -> Row {
        Row::new()
            .with("id", id)
            .with("updated_at", Value::Text(updated.to_string()))
    }

    #[test]
    fn test_translate_incremental() {
        let binding = BindingConfig::new("users", "users")
            .with_schema("public")
            .with_cursor(&["updated_at"])
            .with_key(&["id"]);
        let checkpoint = BindingCheckpoint::initial(&binding);
        let tz = TimezonePolicy::default();
        let mut t = RowTranslator::new(&binding, &checkpoint, &tz);

        let doc = t.translate(row(1, "2024-01-01")).unwrap();
        t.translate(row(2, "2024-01-02")).unwrap();

        assert_eq!(doc.key.as_deref(), Some("[1]"));
        assert_eq!(doc.op, None);
        assert_eq!(doc.body["id"], 1);
        assert_eq!(doc.body["_meta"]["binding"], "users");
        assert_eq!(doc.body["_meta"]["source"]["schema"], "public");
        assert!(doc.body["_meta"].get("polled").is_none());
        assert!(doc.body["_meta"].get("row_id").is_none());

        let summary = t.finish();
        assert_eq!(summary.rows, 2);
        assert_eq!(
            summary.proposed,
            CursorState::new(vec![Value::Text("2024-01-02".into())])
        );
        assert!(summary.snapshot.is_none());
    }

    #[test]
    fn test_null_cursor_does_not_advance() {
        let binding = BindingConfig::new("users", "users").with_cursor(&["updated_at"]);
        let checkpoint = BindingCheckpoint::initial(&binding);
        let tz = TimezonePolicy::default();
        let mut t = RowTranslator::new(&binding, &checkpoint, &tz);

        t.translate(row(1, "2024-01-01")).unwrap();
        t.translate(Row::new().with("id", 2i64).with("updated_at", Value::Null))
            .unwrap();
        let summary = t.finish();
        assert_eq!(summary.null_cursor_rows, 1);
        assert_eq!(
            summary.proposed,
            CursorState::new(vec![Value::Text("2024-01-01".into())])
        );
    }

    #[test]
    fn test_cursor_kind_change_is_fatal() {
        let binding = BindingConfig::new("users", "users").with_cursor(&["updated_at"]);
        let checkpoint = BindingCheckpoint {
            progress: Progress::Cursor(CursorState::new(vec![Value::Int(5)])),
            last_polled: None,
        };
        let tz = TimezonePolicy::default();
        let mut t = RowTranslator::new(&binding, &checkpoint, &tz);
        let err = t.translate(row(1, "2024-01-01")).unwrap_err();
        assert!(matches!(err, ExecuteError::SchemaChange(_)));
        assert!(matches!(
            err.classify("users"),
            CaptureError::Fatal { .. }
        ));
    }

    #[test]
    fn test_missing_cursor_column() {
        let binding = BindingConfig::new("users", "users").with_cursor(&["modified"]);
        let checkpoint = BindingCheckpoint::initial(&binding);
        let tz = TimezonePolicy::default();
        let mut t = RowTranslator::new(&binding, &checkpoint, &tz);
        let err = t.translate(row(1, "x")).unwrap_err();
        assert_eq!(err.to_string(), "column 'modified' is missing from the query result");
    }

    #[test]
    fn test_full_refresh_ops_against_previous_snapshot() {
        let binding = BindingConfig::new("countries", "countries")
            .with_key(&["code"])
            .with_deletions();
        let checkpoint = BindingCheckpoint {
            progress: Progress::Snapshot(Some(RowIdentitySnapshot::Keys {
                keys: ["[\"FR\"]".to_string()].into_iter().collect(),
            })),
            last_polled: None,
        };
        let tz = TimezonePolicy::default();
        let mut t = RowTranslator::new(&binding, &checkpoint, &tz);

        let fr = t.translate(Row::new().with("code", "FR")).unwrap();
        let de = t.translate(Row::new().with("code", "DE")).unwrap();
        assert_eq!(fr.op, None);
        assert!(fr.body["_meta"].get("op").is_none());
        assert_eq!(de.op, Some(Operation::Create));
        assert_eq!(de.body["_meta"]["op"], "c");
        // Keyed identity carries no ordinal.
        assert!(de.body["_meta"].get("row_id").is_none());

        let snapshot = t.finish().snapshot.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains("[\"DE\"]"));
    }

    #[test]
    fn test_ordinal_identity_keys() {
        let binding = BindingConfig::new("events", "events");
        let checkpoint = BindingCheckpoint::initial(&binding);
        let tz = TimezonePolicy::default();
        let mut t = RowTranslator::new(&binding, &checkpoint, &tz);
        let doc = t.translate(Row::new().with("v", 1i64)).unwrap();
        assert_eq!(doc.key.as_deref(), Some("0"));
        assert_eq!(doc.op, None);
        assert_eq!(doc.body["_meta"]["row_id"], 0);
        assert_eq!(
            t.finish().snapshot,
            Some(RowIdentitySnapshot::Ordinal { count: 1 })
        );
    }

    struct Fixture {
        source: MemorySource,
        sink: MemorySink,
        state: StateManager,
        committer: AppendThenAdvance,
    }

    impl Fixture {
        fn new(table: &str, rows: impl IntoIterator<Item = Row>) -> Self {
            let source = MemorySource::new();
            source.set_rows(table, rows.into_iter().collect());
            let sink = MemorySink::new();
            let state = StateManager::new(Arc::new(MemoryStore::new()));
            let committer = AppendThenAdvance::new(Arc::new(sink.clone()), state.clone());
            Self {
                source,
                sink,
                state,
                committer,
            }
        }

        async fn poll(&self, binding: &BindingConfig) -> (PollOutput, BindingCheckpoint) {
            let mut checkpoint = BindingCheckpoint::initial(binding);
            let query = QueryRenderer::new(Dialect::Postgres)
                .render(binding, &CursorState::default(), None)
                .unwrap();
            let tz = TimezonePolicy::default();
            let out = execute(
                &self.source,
                &self.committer,
                PollContext {
                    binding,
                    state_key: &binding.state_key(),
                    query: &query,
                    checkpoint: &mut checkpoint,
                    timezone: &tz,
                    poll_timeout: Duration::from_secs(60),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            (out, checkpoint)
        }
    }

    #[tokio::test]
    async fn test_full_refresh_flushes_bounded_chunks() {
        let fx = Fixture::new("events", (0..7i64).map(|v| Row::new().with("v", v)));
        let mut binding = BindingConfig::new("events", "events").with_deletions();
        binding.commit_every_rows = Some(3);

        let (out, _) = fx.poll(&binding).await;
        assert_eq!(out.flushed_chunks, 2);
        assert_eq!(out.peak_buffered, 3);
        assert_eq!(out.documents.len(), 1);
        assert_eq!(fx.sink.documents("events").len(), 6);
        assert_eq!(fx.sink.largest_append(), 3);
        assert_eq!(
            out.summary.snapshot,
            Some(RowIdentitySnapshot::Ordinal { count: 7 })
        );
        // The snapshot only lands with the final commit.
        assert!(fx
            .state
            .load::<BindingCheckpoint>(&binding.state_key())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cursor_batches_stay_bounded() {
        let fx = Fixture::new(
            "users",
            (1..=10i64).map(|v| Row::new().with("id", v).with("seq", v)),
        );
        let mut binding = BindingConfig::new("users", "users").with_cursor(&["seq"]);
        binding.commit_every_rows = Some(4);

        let (out, checkpoint) = fx.poll(&binding).await;
        assert_eq!(out.intermediate_commits, 2);
        assert_eq!(out.peak_buffered, 4);
        assert_eq!(out.documents.len(), 2);
        assert_eq!(fx.sink.documents("users").len(), 8);
        assert_eq!(
            checkpoint.cursor().unwrap().values,
            vec![Value::Int(8)]
        );
    }

    #[test]
    fn test_poll_deadline_saturates() {
        let start = tokio::time::Instant::now();
        assert_eq!(
            poll_deadline(start, Duration::from_secs(30)),
            start + Duration::from_secs(30)
        );
        assert!(poll_deadline(start, Duration::MAX) > start);
    }

    #[test]
    fn test_classify() {
        let transient = ExecuteError::Source(SourceError::Connection("reset".into()));
        assert!(matches!(
            transient.classify("b"),
            CaptureError::Transient { .. }
        ));
        let rejected = ExecuteError::Source(SourceError::Rejected("syntax".into()));
        assert!(matches!(rejected.classify("b"), CaptureError::Config { .. }));
        let fatal = ExecuteError::Commit(CommitError::Fatal("encode".into()));
        assert!(fatal.classify("b").is_capture_level());
    }
}
