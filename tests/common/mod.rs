#![allow(dead_code)]

use batch_capture::commit::AppendThenAdvance;
use batch_capture::testing::{FaultyStore, MemorySink, MemorySource, TokioClock};
use batch_capture::{
    BindingCheckpoint, BindingConfig, Capture, CaptureReport, CaptureSettings, Committer,
};
use checkpoint::{MemoryStore, StateManager};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use sync_core::{ColumnDefinition, ColumnType, Row, TableDefinition, TableRef, Value};
use tokio_util::sync::CancellationToken;

pub const T0: &str = "2024-01-05T00:00:00Z";

/// A source, sink and state store wired to one simulated clock.
pub struct Harness {
    pub source: MemorySource,
    pub sink: MemorySink,
    pub store: FaultyStore,
    pub state: StateManager,
    pub clock: TokioClock,
}

impl Harness {
    pub fn new() -> Self {
        let store = FaultyStore::new(Arc::new(MemoryStore::new()));
        Self {
            source: MemorySource::new(),
            sink: MemorySink::new(),
            state: StateManager::new(Arc::new(store.clone())),
            store,
            clock: TokioClock::new(t0()),
        }
    }

    pub fn committer(&self) -> Arc<dyn Committer> {
        Arc::new(AppendThenAdvance::new(
            Arc::new(self.sink.clone()),
            self.state.clone(),
        ))
    }

    pub fn capture_with(
        &self,
        bindings: &[BindingConfig],
        settings: CaptureSettings,
        committer: Arc<dyn Committer>,
    ) -> Capture {
        let mut capture = Capture::new(
            Arc::new(self.source.clone()),
            committer,
            self.state.clone(),
            settings,
        )
        .with_clock(Arc::new(self.clock));
        for binding in bindings {
            capture.add_binding(binding.clone(), binding.poll.unwrap_or_default());
        }
        capture
    }

    pub fn capture(&self, bindings: &[BindingConfig], settings: CaptureSettings) -> Capture {
        self.capture_with(bindings, settings, self.committer())
    }

    /// Poll every binding once.
    pub async fn run_once(&self, bindings: &[BindingConfig]) -> CaptureReport {
        self.capture(bindings, once())
            .run(CancellationToken::new())
            .await
            .expect("capture halted")
    }

    /// Run continuously for `duration` of simulated time.
    pub async fn run_for(
        &self,
        bindings: &[BindingConfig],
        duration: std::time::Duration,
    ) -> CaptureReport {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            stop.cancel();
        });
        self.capture(bindings, CaptureSettings::default())
            .run(cancel)
            .await
            .expect("capture halted")
    }

    pub async fn checkpoint(&self, binding: &BindingConfig) -> Option<BindingCheckpoint> {
        self.state.load(&binding.state_key()).await.unwrap()
    }

    /// Values of `column` across every document emitted for `binding`.
    pub fn emitted(&self, binding: &str, column: &str) -> Vec<serde_json::Value> {
        self.sink
            .documents(binding)
            .iter()
            .map(|d| d.body[column].clone())
            .collect()
    }
}

pub fn t0() -> DateTime<Utc> {
    T0.parse().unwrap()
}

pub fn once() -> CaptureSettings {
    CaptureSettings {
        once: true,
        ..Default::default()
    }
}

pub fn date(s: &str) -> Value {
    Value::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap())
}

pub fn users_table() -> TableDefinition {
    TableDefinition::new(
        TableRef::new(None, "users"),
        vec![
            ColumnDefinition::new("id", ColumnType::BigInt),
            ColumnDefinition::new("name", ColumnType::Text).nullable(),
            ColumnDefinition::new("updated_at", ColumnType::Date),
        ],
    )
    .with_primary_key(vec!["id".to_string()])
}

pub fn user(id: i64, updated_at: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("name", format!("user-{id}"))
        .with("updated_at", date(updated_at))
}

pub fn users_binding() -> BindingConfig {
    BindingConfig::new("users", "users")
        .with_cursor(&["updated_at"])
        .with_key(&["id"])
}

pub fn countries_table() -> TableDefinition {
    TableDefinition::new(
        TableRef::new(None, "countries"),
        vec![
            ColumnDefinition::new("code", ColumnType::Text),
            ColumnDefinition::new("name", ColumnType::Text),
        ],
    )
    .with_primary_key(vec!["code".to_string()])
}

pub fn country(code: &str) -> Row {
    Row::new()
        .with("code", code)
        .with("name", format!("Country {code}"))
}
