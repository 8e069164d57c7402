//! Assembly of a capture from its configuration.

use anyhow::{bail, Context, Result};
use checkpoint::{CheckpointStorage, FilesystemStore, MemoryStore, StateManager, Surreal2Store};
use std::sync::Arc;
use surreal_sink::{surreal_connect, SurrealOpts, SurrealSink};
use surrealdb2::engine::any::Any;
use surrealdb2::Surreal;
use sync_core::{DocumentSink, SourceConnector};
use batch_capture_postgresql_source::{sanitize_connection_string, PostgresConnector};

use crate::capture::{Capture, CaptureSettings};
use crate::commit::{AppendThenAdvance, Committer, SurrealCommitter};
use crate::config::{BindingConfig, CaptureConfig, SinkConfig, SourceConfig};
use crate::sink::JsonlSink;

/// Command-line overrides applied on top of the capture file.
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub source_uri: Option<String>,
    pub surreal_password: Option<String>,
    /// Run only these bindings; all when empty
    pub bindings: Vec<String>,
    pub skip_sanity_checks: bool,
    pub once: bool,
}

/// Bindings selected by `opts`, in config order.
pub fn select_bindings<'a>(
    config: &'a CaptureConfig,
    opts: &SetupOptions,
) -> Result<Vec<&'a BindingConfig>> {
    if opts.bindings.is_empty() {
        return Ok(config.bindings.iter().collect());
    }
    for name in &opts.bindings {
        config.binding(name)?;
    }
    Ok(config
        .bindings
        .iter()
        .filter(|b| opts.bindings.contains(&b.name))
        .collect())
}

/// Connect to SurrealDB if the sink or the state store needs it.
pub async fn connect_surreal(
    config: &CaptureConfig,
    opts: &SetupOptions,
) -> Result<Option<Surreal<Any>>> {
    let uses_surreal_state = matches!(config.checkpoint, CheckpointStorage::SurrealDB { .. });
    match &config.sink {
        SinkConfig::SurrealDB {
            endpoint,
            username,
            password,
            namespace,
            database,
        } => {
            let password = opts
                .surreal_password
                .clone()
                .or_else(|| password.clone())
                .unwrap_or_else(|| "root".to_string());
            let surreal_opts = SurrealOpts {
                endpoint: endpoint.clone(),
                username: username.clone(),
                password,
                namespace: namespace.clone(),
                database: database.clone(),
            };
            let client = surreal_connect(&surreal_opts)
                .await
                .with_context(|| format!("Failed to connect to SurrealDB at {endpoint}"))?;
            Ok(Some(client))
        }
        SinkConfig::Jsonl { .. } if uses_surreal_state => {
            bail!("checkpoint type 'surrealdb' requires the 'surrealdb' sink")
        }
        SinkConfig::Jsonl { .. } => Ok(None),
    }
}

/// Open the configured state store.
pub fn open_state(config: &CaptureConfig, surreal: Option<&Surreal<Any>>) -> Result<StateManager> {
    let manager = match &config.checkpoint {
        CheckpointStorage::Filesystem { dir } => {
            StateManager::new(Arc::new(FilesystemStore::new(dir)))
        }
        CheckpointStorage::Memory => {
            tracing::warn!("Checkpoints are kept in memory and lost when the process exits");
            StateManager::new(Arc::new(MemoryStore::new()))
        }
        CheckpointStorage::SurrealDB { table_name } => {
            let Some(client) = surreal else {
                bail!("checkpoint type 'surrealdb' requires a SurrealDB connection");
            };
            StateManager::new(Arc::new(Surreal2Store::new(
                client.clone(),
                table_name.clone(),
            )))
        }
    };
    Ok(manager)
}

/// Build the source connector.
pub fn open_source(config: &CaptureConfig, opts: &SetupOptions) -> Result<Arc<dyn SourceConnector>> {
    let uri = config.source_uri(opts.source_uri.as_deref())?;
    match &config.source {
        SourceConfig::Postgres { .. } => {
            tracing::info!(
                "Using PostgreSQL source {}",
                sanitize_connection_string(&uri)
            );
            Ok(Arc::new(PostgresConnector::new(uri)))
        }
    }
}

/// Pick the committer for the configured sink and state store.
pub fn build_committer(
    config: &CaptureConfig,
    surreal: Option<&Surreal<Any>>,
    state: &StateManager,
) -> Result<Arc<dyn Committer>> {
    match (&config.sink, &config.checkpoint, surreal) {
        (SinkConfig::SurrealDB { .. }, CheckpointStorage::SurrealDB { table_name }, Some(client)) => {
            tracing::info!("Documents and checkpoints share SurrealDB; committing transactionally");
            Ok(Arc::new(SurrealCommitter::new(SurrealSink::new(
                client.clone(),
                table_name.clone(),
            ))))
        }
        (SinkConfig::SurrealDB { .. }, _, Some(client)) => {
            let sink: Arc<dyn DocumentSink> =
                Arc::new(SurrealSink::new(client.clone(), String::new()));
            Ok(Arc::new(AppendThenAdvance::new(sink, state.clone())))
        }
        (SinkConfig::SurrealDB { .. }, _, None) => {
            bail!("the 'surrealdb' sink requires a SurrealDB connection")
        }
        (SinkConfig::Jsonl { dir }, _, _) => {
            let sink: Arc<dyn DocumentSink> = Arc::new(JsonlSink::new(dir));
            Ok(Arc::new(AppendThenAdvance::new(sink, state.clone())))
        }
    }
}

/// Build a ready-to-run capture from the config and overrides.
pub async fn build_capture(config: &CaptureConfig, opts: &SetupOptions) -> Result<Capture> {
    let bindings = select_bindings(config, opts)?;
    if bindings.is_empty() {
        bail!("No bindings configured");
    }

    let mut settings = CaptureSettings::from_config(config)?;
    settings.skip_sanity_checks |= opts.skip_sanity_checks;
    settings.once = opts.once;

    let surreal = connect_surreal(config, opts).await?;
    let state = open_state(config, surreal.as_ref())?;
    let committer = build_committer(config, surreal.as_ref(), &state)?;
    let source = open_source(config, opts)?;

    let mut capture = Capture::new(source, committer, state, settings);
    for binding in bindings {
        capture.add_binding(binding.clone(), binding.schedule(&config.defaults));
    }
    Ok(capture)
}
