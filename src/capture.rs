//! Capture runtime.
//!
//! A [`Capture`] owns the configured bindings and runs each one in its own
//! task. A binding loops: sleep until its next trigger, render the query
//! from its persisted state, execute it, commit documents and state, and
//! re-arm. Binding-local failures never stop sibling bindings; a
//! capture-level failure cancels all of them.

use checkpoint::StateManager;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{SourceConnector, TableDefinition, TimezonePolicy};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::commit::Committer;
use crate::config::{BindingConfig, CaptureConfig, PollSchedule};
use crate::deletion::{reconcile, tombstones};
use crate::error::{CaptureError, ErrorClass};
use crate::execute::{execute, ExecuteError, PollContext, PollOutput};
use crate::render::QueryRenderer;
use crate::schedule::{BindingSchedule, Clock, FailureOutcome, InvalidTransition, SystemClock};
use crate::state::{BindingCheckpoint, Progress};

/// Runtime settings shared by every binding.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub poll_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub timezone: TimezonePolicy,
    pub skip_sanity_checks: bool,
    /// Poll each binding once, then stop
    pub once: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(30 * 60),
            max_consecutive_failures: 5,
            timezone: TimezonePolicy::default(),
            skip_sanity_checks: false,
            once: false,
        }
    }
}

impl CaptureSettings {
    pub fn from_config(config: &CaptureConfig) -> anyhow::Result<Self> {
        Ok(Self {
            poll_timeout: config.defaults.poll_timeout.0,
            max_consecutive_failures: config.defaults.max_consecutive_failures,
            timezone: TimezonePolicy::parse(&config.defaults.timezone)?,
            skip_sanity_checks: config.advanced.skip_sanity_checks,
            once: false,
        })
    }
}

/// Outcome of startup validation.
#[derive(Debug, Default)]
pub struct Preflight {
    /// Discovered definitions of the bindings' tables
    pub tables: BTreeMap<String, TableDefinition>,
    /// Bindings that must not start
    pub errors: Vec<CaptureError>,
    /// Sanity problems that were skipped
    pub warnings: Vec<String>,
}

impl Preflight {
    fn is_blocked(&self, binding: &str) -> bool {
        self.errors.iter().any(|e| e.binding() == Some(binding))
    }
}

/// What one binding did before it stopped.
#[derive(Debug)]
pub struct BindingReport {
    pub binding: String,
    pub polls: u64,
    pub failures: u64,
    pub rows: u64,
    pub deletions: u64,
    /// Most documents any single poll held in memory
    pub peak_buffered: usize,
    /// Error that stopped the binding, if any
    pub error: Option<CaptureError>,
}

impl BindingReport {
    fn new(binding: &str) -> Self {
        Self {
            binding: binding.to_string(),
            polls: 0,
            failures: 0,
            rows: 0,
            deletions: 0,
            peak_buffered: 0,
            error: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CaptureReport {
    pub bindings: Vec<BindingReport>,
}

impl CaptureReport {
    pub fn binding(&self, name: &str) -> Option<&BindingReport> {
        self.bindings.iter().find(|b| b.binding == name)
    }

    /// Bindings that stopped on an error.
    pub fn failed(&self) -> impl Iterator<Item = &BindingReport> {
        self.bindings.iter().filter(|b| b.error.is_some())
    }
}

/// Per-poll counters, logged after each commit.
#[derive(Debug, Clone, Copy, Default)]
struct PollStats {
    rows: u64,
    deletions: u64,
    null_cursor_rows: u64,
    intermediate_commits: u32,
    flushed_chunks: u32,
    peak_buffered: usize,
}

pub struct Capture {
    bindings: Vec<(BindingConfig, PollSchedule)>,
    source: Arc<dyn SourceConnector>,
    committer: Arc<dyn Committer>,
    state: StateManager,
    clock: Arc<dyn Clock>,
    settings: CaptureSettings,
}

impl Capture {
    pub fn new(
        source: Arc<dyn SourceConnector>,
        committer: Arc<dyn Committer>,
        state: StateManager,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            bindings: Vec::new(),
            source,
            committer,
            state,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn add_binding(&mut self, binding: BindingConfig, schedule: PollSchedule) {
        self.bindings.push((binding, schedule));
    }

    pub fn bindings(&self) -> impl Iterator<Item = &BindingConfig> {
        self.bindings.iter().map(|(b, _)| b)
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn renderer(&self) -> QueryRenderer {
        QueryRenderer::new(self.source.dialect())
    }

    /// Validate the sink, the source and every binding.
    ///
    /// Sink and source failures are capture-level errors. Binding problems
    /// are collected so the remaining bindings can still start.
    pub async fn preflight(&self) -> Result<Preflight, CaptureError> {
        self.committer
            .check()
            .await
            .map_err(|e| CaptureError::capture(format!("sink check failed: {e}")))?;

        let mut session = self.source.connect().await.map_err(|e| {
            CaptureError::capture(format!(
                "cannot connect to {} source: {e}",
                self.source.source_type()
            ))
        })?;

        let mut preflight = Preflight::default();
        let renderer = self.renderer();

        for (binding, _) in &self.bindings {
            if let Err(e) = binding.validate() {
                preflight.errors.push(e);
                continue;
            }
            let Some(table_ref) = binding.table_ref() else {
                continue;
            };
            let table = match session.describe_table(&table_ref).await {
                Ok(Some(table)) => table,
                Ok(None) => {
                    preflight.errors.push(CaptureError::config(
                        &binding.name,
                        format!("table {table_ref} does not exist"),
                    ));
                    continue;
                }
                Err(e) if e.is_transient() => {
                    return Err(CaptureError::capture(format!(
                        "source failed during preflight: {e}"
                    )))
                }
                Err(e) => {
                    preflight.errors.push(CaptureError::config(&binding.name, e));
                    continue;
                }
            };
            if let Err(e) = renderer.validate(binding, &table) {
                preflight.errors.push(CaptureError::config(&binding.name, e));
                continue;
            }

            for column in &binding.cursor {
                if table.get_column(column).is_some_and(|c| c.nullable) {
                    let problem = format!(
                        "cursor column '{column}' is nullable; rows with a NULL cursor are never re-read"
                    );
                    if self.settings.skip_sanity_checks {
                        preflight
                            .warnings
                            .push(format!("binding '{}': {problem}", binding.name));
                    } else {
                        preflight
                            .errors
                            .push(CaptureError::sanity(&binding.name, problem));
                    }
                }
            }
            preflight.tables.insert(binding.name.clone(), table);
        }

        let problems = session
            .sanity_check(self.settings.poll_timeout)
            .await
            .map_err(|e| CaptureError::capture(format!("source sanity check failed: {e}")))?;
        if !problems.is_empty() {
            if self.settings.skip_sanity_checks {
                preflight.warnings.extend(problems);
            } else {
                return Err(CaptureError::capture(format!(
                    "{} error: {}",
                    ErrorClass::Sanity,
                    problems.join("; ")
                )));
            }
        }

        for warning in &preflight.warnings {
            tracing::warn!("Sanity check skipped: {warning}");
        }
        Ok(preflight)
    }

    /// Run every binding until cancellation, `once` completion, or a
    /// capture-level error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<CaptureReport, CaptureError> {
        let preflight = self.preflight().await?;
        let mut report = CaptureReport::default();

        let halt = cancel.child_token();
        let mut tasks = JoinSet::new();
        for (binding, schedule) in &self.bindings {
            if preflight.is_blocked(&binding.name) {
                continue;
            }
            let runner = BindingRunner {
                state_key: binding.state_key(),
                binding: binding.clone(),
                schedule: *schedule,
                source: Arc::clone(&self.source),
                committer: Arc::clone(&self.committer),
                state: self.state.clone(),
                clock: Arc::clone(&self.clock),
                renderer: self.renderer(),
                settings: self.settings,
            };
            tracing::info!(
                "Starting binding '{}' (state key '{}', schedule {})",
                runner.binding.name,
                runner.state_key,
                schedule
            );
            tasks.spawn(runner.run(halt.clone()));
        }

        for error in preflight.errors {
            tracing::error!("{error}");
            let mut failed = BindingReport::new(error.binding().unwrap_or_default());
            failed.error = Some(error);
            report.bindings.push(failed);
        }

        let mut capture_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(mut binding_report) => {
                    if binding_report
                        .error
                        .as_ref()
                        .is_some_and(CaptureError::is_capture_level)
                    {
                        halt.cancel();
                        if capture_error.is_none() {
                            capture_error = binding_report.error.take();
                        }
                    }
                    report.bindings.push(binding_report);
                }
                Err(e) => {
                    halt.cancel();
                    capture_error.get_or_insert(CaptureError::capture(format!(
                        "binding task failed: {e}"
                    )));
                }
            }
        }

        match capture_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

struct BindingRunner {
    binding: BindingConfig,
    state_key: String,
    schedule: PollSchedule,
    source: Arc<dyn SourceConnector>,
    committer: Arc<dyn Committer>,
    state: StateManager,
    clock: Arc<dyn Clock>,
    renderer: QueryRenderer,
    settings: CaptureSettings,
}

impl BindingRunner {
    async fn run(self, cancel: CancellationToken) -> BindingReport {
        let mut report = BindingReport::new(&self.binding.name);
        if let Err(e) = self.run_loop(&cancel, &mut report).await {
            tracing::error!("{e}");
            report.error = Some(e);
        }
        report
    }

    async fn load_checkpoint(&self) -> Result<BindingCheckpoint, CaptureError> {
        let name = &self.binding.name;
        let remedy = format!(
            "run `state reset --binding {name}` or bump the binding's backfill counter"
        );
        let loaded = self
            .state
            .load::<BindingCheckpoint>(&self.state_key)
            .await
            .map_err(|e| {
                CaptureError::config(name, format!("cannot load persisted state: {e:#}; {remedy}"))
            })?;
        match loaded {
            Some(checkpoint) if !checkpoint.matches(&self.binding) => Err(CaptureError::config(
                name,
                format!(
                    "persisted state {} does not fit the binding's cursor columns; {remedy}",
                    checkpoint.progress_summary()
                ),
            )),
            Some(checkpoint) => {
                tracing::info!("Binding '{name}' resuming from {}", checkpoint.progress_summary());
                Ok(checkpoint)
            }
            None => Ok(BindingCheckpoint::initial(&self.binding)),
        }
    }

    async fn run_loop(
        &self,
        cancel: &CancellationToken,
        report: &mut BindingReport,
    ) -> Result<(), CaptureError> {
        let name = self.binding.name.as_str();
        let invalid = |e: InvalidTransition| CaptureError::fatal(name, e);

        let mut checkpoint = self.load_checkpoint().await?;
        let mut schedule = BindingSchedule::new(
            self.schedule,
            self.settings.max_consecutive_failures,
            self.clock.now(),
            checkpoint.last_polled,
        );

        loop {
            let next = schedule.next_trigger();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.clock.sleep_until(next) => {}
            }

            let now = self.clock.now();
            if !schedule.poll_due(now).map_err(invalid)? {
                continue;
            }
            schedule.start(now).map_err(invalid)?;

            match self.poll_once(&mut checkpoint, now, cancel).await {
                Ok(stats) => {
                    schedule.commit(self.clock.now()).map_err(invalid)?;
                    report.polls += 1;
                    report.rows += stats.rows;
                    report.deletions += stats.deletions;
                    report.peak_buffered = report.peak_buffered.max(stats.peak_buffered);
                    tracing::info!(
                        "Binding '{name}' poll started at {now} committed: {} rows, {} deletions, {} intermediate commits, {} chunks, {}; next poll at {}",
                        stats.rows,
                        stats.deletions,
                        stats.intermediate_commits,
                        stats.flushed_chunks,
                        checkpoint.progress_summary(),
                        schedule.next_trigger()
                    );
                    if stats.null_cursor_rows > 0 {
                        tracing::warn!(
                            "Binding '{name}' emitted {} rows with NULL cursor values",
                            stats.null_cursor_rows
                        );
                    }
                }
                Err(ExecuteError::Cancelled) => {
                    tracing::info!("Binding '{name}' poll cancelled by shutdown");
                    return Ok(());
                }
                Err(e) => {
                    let error = e.classify(name);
                    if error.class() != ErrorClass::Transient {
                        return Err(error);
                    }
                    report.failures += 1;
                    match schedule.fail(self.clock.now()).map_err(invalid)? {
                        FailureOutcome::Retry { consecutive } => {
                            tracing::warn!(
                                "{error} (failure {consecutive} of {}); retrying at {}",
                                self.settings.max_consecutive_failures,
                                schedule.next_trigger()
                            );
                            if self.settings.once {
                                return Err(error);
                            }
                        }
                        FailureOutcome::Exhausted { consecutive } => {
                            return Err(CaptureError::fatal(
                                name,
                                format!("{consecutive} consecutive failed polls; last: {error}"),
                            ));
                        }
                    }
                }
            }

            schedule.rearm().map_err(invalid)?;
            if self.settings.once {
                return Ok(());
            }
        }
    }

    async fn poll_once(
        &self,
        checkpoint: &mut BindingCheckpoint,
        polled_at: chrono::DateTime<chrono::Utc>,
        cancel: &CancellationToken,
    ) -> Result<PollStats, ExecuteError> {
        let cursor = checkpoint.cursor().cloned().unwrap_or_default();
        let query = self.renderer.render(&self.binding, &cursor, None)?;

        let PollOutput {
            mut documents,
            summary,
            intermediate_commits,
            flushed_chunks,
            peak_buffered,
        } = execute(
            self.source.as_ref(),
            self.committer.as_ref(),
            PollContext {
                binding: &self.binding,
                state_key: &self.state_key,
                query: &query,
                checkpoint: &mut *checkpoint,
                timezone: &self.settings.timezone,
                poll_timeout: self.settings.poll_timeout,
            },
            cancel,
        )
        .await?;

        let mut deletions = 0;
        let progress = match (&checkpoint.progress, summary.snapshot) {
            (Progress::Cursor(current), _) => Progress::Cursor(
                current
                    .advance(&summary.proposed)
                    .map_err(|e| ExecuteError::SchemaChange(e.to_string()))?,
            ),
            (Progress::Snapshot(previous), Some(current)) if self.binding.infer_deletions => {
                let missing = reconcile(previous.as_ref(), &current);
                let deleted = tombstones(&self.binding, &missing);
                deletions = deleted.len() as u64;
                documents.extend(deleted);
                Progress::Snapshot(Some(current))
            }
            (Progress::Snapshot(_), _) => Progress::Snapshot(None),
        };

        let next = BindingCheckpoint {
            progress,
            last_polled: Some(polled_at),
        };
        self.committer
            .commit(&self.binding.name, &self.state_key, &documents, &next)
            .await?;
        *checkpoint = next;

        Ok(PollStats {
            rows: summary.rows,
            deletions,
            null_cursor_rows: summary.null_cursor_rows,
            intermediate_commits,
            flushed_chunks,
            peak_buffered,
        })
    }
}
