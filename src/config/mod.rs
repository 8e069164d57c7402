//! Capture configuration.
//!
//! A capture is described by one YAML file:
//!
//! ```yaml
//! source:
//!   type: postgres
//!   uri: postgresql://capture@db:5432/app
//! defaults:
//!   poll: 5m
//!   poll_timeout: 30m
//!   max_consecutive_failures: 5
//!   timezone: UTC
//! checkpoint:
//!   type: filesystem
//!   dir: .batch-capture-state
//! sink:
//!   type: jsonl
//!   dir: ./out
//! bindings:
//!   - name: users
//!     schema: public
//!     table: users
//!     cursor: [updated_at]
//!     key: [id]
//!   - name: countries
//!     table: countries
//!     poll: daily at 02:00Z
//!     infer_deletions: true
//! ```

pub mod duration;
pub mod schedule;

use anyhow::Context;
use checkpoint::CheckpointStorage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use sync_core::{Dialect, TableRef};

use crate::error::CaptureError;
pub use duration::{parse_duration, ConfigDuration};
pub use schedule::PollSchedule;

/// Rows held in memory per binding before they are committed or flushed.
pub const DEFAULT_COMMIT_EVERY_ROWS: usize = 10_000;

/// Environment variable consulted when the source has no `uri`.
pub const SOURCE_URI_ENV: &str = "BATCH_CAPTURE_SOURCE_URI";

/// Top-level capture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub checkpoint: CheckpointStorage,
    pub sink: SinkConfig,
    #[serde(default)]
    pub advanced: Advanced,
    pub bindings: Vec<BindingConfig>,
}

/// Source endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SourceConfig {
    /// PostgreSQL over tokio-postgres
    Postgres {
        /// Connection string; falls back to `BATCH_CAPTURE_SOURCE_URI`
        #[serde(default)]
        uri: Option<String>,
    },
}

impl SourceConfig {
    /// Dialect queries for this source are rendered in.
    pub fn dialect(&self) -> Dialect {
        match self {
            SourceConfig::Postgres { .. } => Dialect::Postgres,
        }
    }
}

/// Capture-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Schedule of bindings without their own `poll`
    #[serde(default)]
    pub poll: PollSchedule,
    /// Maximum duration of a poll's fetch phase
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: ConfigDuration,
    /// Consecutive failed polls after which a binding is fatally errored
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// IANA zone naive source timestamps are interpreted in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_poll_timeout() -> ConfigDuration {
    ConfigDuration(Duration::from_secs(30 * 60))
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            poll: PollSchedule::default(),
            poll_timeout: default_poll_timeout(),
            max_consecutive_failures: default_max_consecutive_failures(),
            timezone: default_timezone(),
        }
    }
}

/// Where documents are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SinkConfig {
    /// One `<binding>.jsonl` file per binding under `dir`
    Jsonl { dir: String },
    /// One table per binding in SurrealDB
    #[serde(rename = "surrealdb")]
    SurrealDB {
        #[serde(default = "default_surreal_endpoint")]
        endpoint: String,
        #[serde(default = "default_surreal_username")]
        username: String,
        /// Falls back to `SURREAL_PASSWORD`
        #[serde(default)]
        password: Option<String>,
        namespace: String,
        database: String,
    },
}

fn default_surreal_endpoint() -> String {
    "ws://localhost:8000".to_string()
}

fn default_surreal_username() -> String {
    "root".to_string()
}

/// Escape hatches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Advanced {
    /// Start even when startup sanity checks fail
    #[serde(default)]
    pub skip_sanity_checks: bool,
}

/// One unit of capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    /// Unique binding name; also names the output
    pub name: String,
    /// Schema (namespace) of the table
    #[serde(default)]
    pub schema: Option<String>,
    /// Table or view; optional only for templated bindings
    #[serde(default)]
    pub table: Option<String>,
    /// Cursor columns in ordering priority; empty means full refresh
    #[serde(default)]
    pub cursor: Vec<String>,
    /// Columns whose values form the document key
    #[serde(default)]
    pub key: Vec<String>,
    /// Schedule override
    #[serde(default)]
    pub poll: Option<PollSchedule>,
    /// Query template override
    #[serde(default)]
    pub template: Option<String>,
    /// Emit deletion documents for rows missing from a full refresh
    #[serde(default)]
    pub infer_deletions: bool,
    /// Columns identifying a row across full refreshes.
    ///
    /// Defaults to `key`; when both are empty the row's ordinal in the
    /// result is its identity.
    #[serde(default)]
    pub row_identity: Vec<String>,
    /// Re-fetch rows equal to the cursor (`>=` instead of `>`)
    #[serde(default)]
    pub cursor_inclusive: bool,
    /// Bumping this restarts the binding from an empty state
    #[serde(default)]
    pub backfill: u32,
    /// Rows buffered before they leave memory: cursor bindings commit at
    /// the next cursor value boundary, full-refresh bindings append a chunk
    #[serde(default)]
    pub commit_every_rows: Option<usize>,
}

impl BindingConfig {
    /// A full-refresh binding on `table`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table: Some(table.into()),
            cursor: Vec::new(),
            key: Vec::new(),
            poll: None,
            template: None,
            infer_deletions: false,
            row_identity: Vec::new(),
            cursor_inclusive: false,
            backfill: 0,
            commit_every_rows: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_cursor(mut self, columns: &[&str]) -> Self {
        self.cursor = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_key(mut self, columns: &[&str]) -> Self {
        self.key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_poll(mut self, poll: PollSchedule) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_deletions(mut self) -> Self {
        self.infer_deletions = true;
        self
    }

    /// Whether every poll re-reads the whole resource.
    pub fn is_full_refresh(&self) -> bool {
        self.cursor.is_empty()
    }

    /// Table reference, if the binding names a table.
    pub fn table_ref(&self) -> Option<TableRef> {
        self.table
            .as_ref()
            .map(|t| TableRef::new(self.schema.clone(), t.clone()))
    }

    /// Columns identifying a row; empty means ordinal identity.
    pub fn identity_columns(&self) -> &[String] {
        if self.row_identity.is_empty() {
            &self.key
        } else {
            &self.row_identity
        }
    }

    /// Key under which this binding's checkpoint is stored.
    pub fn state_key(&self) -> String {
        checkpoint::state_key(&self.name, self.backfill)
    }

    /// Most documents a poll of this binding holds in memory.
    pub fn batch_rows(&self) -> usize {
        self.commit_every_rows.unwrap_or(DEFAULT_COMMIT_EVERY_ROWS)
    }

    /// Schedule of this binding under `defaults`.
    pub fn schedule(&self, defaults: &Defaults) -> PollSchedule {
        self.poll.unwrap_or(defaults.poll)
    }

    /// Check the binding for internal consistency.
    pub fn validate(&self) -> Result<(), CaptureError> {
        let fail = |msg: &str| Err(CaptureError::config(&self.name, msg));

        if self.name.trim().is_empty() {
            return Err(CaptureError::config("<unnamed>", "binding name is empty"));
        }
        if self.table.is_none() && self.template.is_none() {
            return fail("binding needs a table or a template");
        }
        if self.infer_deletions && !self.is_full_refresh() {
            return fail("infer_deletions requires a full-refresh binding (no cursor columns)");
        }
        if self.commit_every_rows == Some(0) {
            return fail("commit_every_rows must be greater than zero");
        }
        if self.cursor_inclusive && self.is_full_refresh() {
            return fail("cursor_inclusive requires cursor columns");
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.cursor.iter().find(|c| !seen.insert(c.as_str())) {
            return fail(&format!("cursor column '{dup}' listed twice"));
        }
        Ok(())
    }
}

impl CaptureConfig {
    /// Load and validate a YAML capture file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let config: CaptureConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check capture-wide and per-binding consistency.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.defaults.max_consecutive_failures == 0 {
            return Err(CaptureError::capture(
                "defaults.max_consecutive_failures must be at least 1",
            ));
        }
        if self.defaults.timezone.trim().parse::<chrono_tz::Tz>().is_err() {
            return Err(CaptureError::capture(format!(
                "defaults.timezone '{}' is not an IANA time zone",
                self.defaults.timezone
            )));
        }
        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for binding in &self.bindings {
            binding.validate()?;
            if !names.insert(binding.name.as_str()) {
                return Err(CaptureError::config(&binding.name, "duplicate binding name"));
            }
            if !keys.insert(binding.state_key()) {
                return Err(CaptureError::config(
                    &binding.name,
                    "binding state key collides with another binding",
                ));
            }
            if let (SinkConfig::SurrealDB { .. }, CheckpointStorage::SurrealDB { table_name }) =
                (&self.sink, &self.checkpoint)
            {
                if surreal_sink::SurrealSink::table_for(&binding.name) == *table_name {
                    return Err(CaptureError::config(
                        &binding.name,
                        format!("documents would be written to the checkpoint table '{table_name}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Look up a binding by name.
    pub fn binding(&self, name: &str) -> anyhow::Result<&BindingConfig> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| anyhow::anyhow!("No binding named '{name}' in config"))
    }

    /// Resolve the source URI from the config or the environment.
    pub fn source_uri(&self, override_uri: Option<&str>) -> anyhow::Result<String> {
        if let Some(uri) = override_uri {
            return Ok(uri.to_string());
        }
        match &self.source {
            SourceConfig::Postgres { uri: Some(uri) } => Ok(uri.clone()),
            SourceConfig::Postgres { uri: None } => std::env::var(SOURCE_URI_ENV)
                .with_context(|| format!("source.uri is not set and {SOURCE_URI_ENV} is unset")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
source:
  type: postgres
  uri: postgresql://capture@localhost/app
defaults:
  poll: 5m
sink:
  type: jsonl
  dir: ./out
bindings:
  - name: users
    schema: public
    table: users
    cursor: [updated_at, id]
    key: [id]
  - name: countries
    table: countries
    poll: daily at 02:00Z
    infer_deletions: true
    row_identity: [code]
"#;

    #[test]
    fn test_parse_sample() {
        let config = CaptureConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.bindings.len(), 2);
        assert_eq!(config.checkpoint, CheckpointStorage::default());
        assert_eq!(config.defaults.max_consecutive_failures, 5);

        let users = config.binding("users").unwrap();
        assert!(!users.is_full_refresh());
        assert_eq!(users.schedule(&config.defaults).to_string(), "5m");

        let countries = config.binding("countries").unwrap();
        assert_eq!(
            countries.schedule(&config.defaults).to_string(),
            "daily at 02:00Z"
        );
        assert_eq!(countries.identity_columns(), ["code".to_string()]);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let text = SAMPLE.replace("infer_deletions", "infer_deletes");
        assert!(CaptureConfig::from_yaml(&text).is_err());
    }

    #[test]
    fn test_duplicate_binding_names() {
        let text = SAMPLE.replace("name: countries", "name: users");
        let err = CaptureConfig::from_yaml(&text).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate binding name"));
    }

    #[test]
    fn test_deletions_require_full_refresh() {
        let binding = BindingConfig::new("b", "t")
            .with_cursor(&["id"])
            .with_deletions();
        let err = binding.validate().unwrap_err();
        assert!(err.to_string().contains("binding 'b'"));
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn test_batch_rows_is_always_bounded() {
        let config = CaptureConfig::from_yaml(SAMPLE).unwrap();
        let users = config.binding("users").unwrap();
        assert_eq!(users.batch_rows(), DEFAULT_COMMIT_EVERY_ROWS);

        let mut countries = config.binding("countries").unwrap().clone();
        countries.commit_every_rows = Some(500);
        countries.validate().unwrap();
        assert_eq!(countries.batch_rows(), 500);

        countries.commit_every_rows = Some(0);
        assert!(countries.validate().is_err());
    }

    #[test]
    fn test_binding_cannot_write_into_checkpoint_table() {
        let text = SAMPLE
            .replace(
                "type: jsonl\n  dir: ./out",
                "type: surrealdb\n  namespace: ns\n  database: db",
            )
            .replace(
                "sink:",
                "checkpoint:\n  type: surrealdb\n  table_name: countries\nsink:",
            );
        let err = CaptureConfig::from_yaml(&text).unwrap_err();
        assert!(format!("{err:#}").contains("checkpoint table 'countries'"));
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let text = SAMPLE.replace("poll: 5m", "poll: 5m\n  timezone: Mars/Olympus");
        let err = CaptureConfig::from_yaml(&text).unwrap_err();
        assert!(format!("{err:#}").contains("not an IANA time zone"));
    }

    #[test]
    fn test_state_key_tracks_backfill() {
        let mut binding = BindingConfig::new("public.users", "users");
        assert_eq!(binding.state_key(), "public%2Eusers");
        binding.backfill = 1;
        assert_eq!(binding.state_key(), "public%2Eusers.v1");
    }

    #[test]
    fn test_surrealdb_sink_defaults() {
        let text = SAMPLE.replace(
            "type: jsonl\n  dir: ./out",
            "type: surrealdb\n  namespace: ns\n  database: db",
        );
        let config = CaptureConfig::from_yaml(&text).unwrap();
        match config.sink {
            SinkConfig::SurrealDB {
                endpoint, username, ..
            } => {
                assert_eq!(endpoint, "ws://localhost:8000");
                assert_eq!(username, "root");
            }
            other => panic!("unexpected sink {other:?}"),
        }
    }
}
