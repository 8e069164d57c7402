//! Command-line interface for batch-capture
//!
//! # Usage Examples
//!
//! ```bash
//! # Capture continuously; Ctrl-C stops after in-flight commits finish
//! batch-capture run --config capture.yaml
//!
//! # Validate tables, columns and sanity checks without polling
//! batch-capture check --config capture.yaml
//!
//! # Inspect and reset persisted state
//! batch-capture state show --config capture.yaml
//! batch-capture state reset --config capture.yaml --binding users
//! ```

use anyhow::Context;
use batch_capture::config::CaptureConfig;
use batch_capture::setup::{self, SetupOptions};
use batch_capture::{BindingCheckpoint, QueryRenderer};
use checkpoint::Checkpoint;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "batch-capture")]
#[command(about = "Incremental batch capture from SQL databases")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ConnectionOpts {
    /// Capture configuration file
    #[arg(long, short = 'c', value_name = "PATH")]
    config: PathBuf,

    /// Source connection string, overriding `source.uri`
    #[arg(long, env = "BATCH_CAPTURE_SOURCE_URI", hide_env_values = true)]
    source_uri: Option<String>,

    /// SurrealDB password, overriding `sink.password`
    #[arg(long, env = "SURREAL_PASSWORD", hide_env_values = true)]
    surreal_password: Option<String>,
}

impl ConnectionOpts {
    fn load(&self) -> anyhow::Result<CaptureConfig> {
        CaptureConfig::from_file(&self.config)
    }

    fn setup_options(&self) -> SetupOptions {
        SetupOptions {
            source_uri: self.source_uri.clone(),
            surreal_password: self.surreal_password.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll bindings on their schedules
    Run {
        #[command(flatten)]
        opts: ConnectionOpts,

        /// Poll each binding once, then exit
        #[arg(long)]
        once: bool,

        /// Run only this binding (repeatable)
        #[arg(long = "binding", value_name = "NAME")]
        bindings: Vec<String>,

        /// Start even if startup sanity checks fail
        #[arg(long)]
        skip_sanity_checks: bool,
    },

    /// Validate configuration, source tables and sanity checks
    Check {
        #[command(flatten)]
        opts: ConnectionOpts,

        /// Start even if startup sanity checks fail
        #[arg(long)]
        skip_sanity_checks: bool,
    },

    /// Print the query a binding would run next
    Render {
        #[command(flatten)]
        opts: ConnectionOpts,

        #[arg(long, value_name = "NAME")]
        binding: String,
    },

    /// Inspect or reset persisted binding state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
}

#[derive(Subcommand)]
enum StateCommand {
    /// Show persisted state of all bindings, or one
    Show {
        #[command(flatten)]
        opts: ConnectionOpts,

        #[arg(long, value_name = "NAME")]
        binding: Option<String>,
    },

    /// Delete a binding's state so its next poll backfills
    Reset {
        #[command(flatten)]
        opts: ConnectionOpts,

        #[arg(long, value_name = "NAME")]
        binding: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            opts,
            once,
            bindings,
            skip_sanity_checks,
        } => {
            let config = opts.load()?;
            let setup_opts = SetupOptions {
                bindings,
                skip_sanity_checks,
                once,
                ..opts.setup_options()
            };
            run_capture(&config, &setup_opts).await
        }
        Commands::Check {
            opts,
            skip_sanity_checks,
        } => {
            let config = opts.load()?;
            let setup_opts = SetupOptions {
                skip_sanity_checks,
                ..opts.setup_options()
            };
            check(&config, &setup_opts).await
        }
        Commands::Render { opts, binding } => {
            let config = opts.load()?;
            render(&config, &opts.setup_options(), &binding).await
        }
        Commands::State { command } => match command {
            StateCommand::Show { opts, binding } => {
                let config = opts.load()?;
                show_state(&config, &opts.setup_options(), binding.as_deref()).await
            }
            StateCommand::Reset { opts, binding } => {
                let config = opts.load()?;
                reset_state(&config, &opts.setup_options(), &binding).await
            }
        },
    }
}

async fn run_capture(config: &CaptureConfig, opts: &SetupOptions) -> anyhow::Result<()> {
    let capture = setup::build_capture(config, opts).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down after in-flight commits");
            on_signal.cancel();
        }
    });

    let report = capture.run(cancel).await?;
    for binding in &report.bindings {
        tracing::info!(
            "Binding '{}': {} polls, {} failed polls, {} rows, {} deletions",
            binding.binding,
            binding.polls,
            binding.failures,
            binding.rows,
            binding.deletions
        );
    }

    let failed: Vec<String> = report
        .failed()
        .filter_map(|b| b.error.as_ref().map(|e| e.to_string()))
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("{} binding(s) failed:\n  {}", failed.len(), failed.join("\n  "));
    }
    Ok(())
}

async fn check(config: &CaptureConfig, opts: &SetupOptions) -> anyhow::Result<()> {
    let capture = setup::build_capture(config, opts).await?;
    let preflight = capture.preflight().await?;

    for (name, table) in &preflight.tables {
        println!("{name}: {} ({} columns)", table.table, table.columns.len());
    }
    for warning in &preflight.warnings {
        println!("warning: {warning}");
    }
    if !preflight.errors.is_empty() {
        let errors: Vec<String> = preflight.errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("{}", errors.join("\n"));
    }
    println!("Configuration OK");
    Ok(())
}

async fn render(config: &CaptureConfig, opts: &SetupOptions, name: &str) -> anyhow::Result<()> {
    let binding = config.binding(name)?;
    let surreal = setup::connect_surreal(config, opts).await?;
    let state = setup::open_state(config, surreal.as_ref())?;

    let checkpoint = state
        .load::<BindingCheckpoint>(&binding.state_key())
        .await?
        .unwrap_or_else(|| BindingCheckpoint::initial(binding));
    let cursor = checkpoint.cursor().cloned().unwrap_or_default();
    let query = QueryRenderer::new(config.source.dialect())
        .render(binding, &cursor, None)
        .with_context(|| format!("Failed to render binding '{name}'"))?;

    println!("{}", query.sql);
    if !query.params.is_empty() {
        println!("-- parameters: {cursor}");
        println!("-- inline: {}", query.inline());
    }
    Ok(())
}

async fn show_state(
    config: &CaptureConfig,
    opts: &SetupOptions,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let surreal = setup::connect_surreal(config, opts).await?;
    let state = setup::open_state(config, surreal.as_ref())?;

    if let Some(name) = name {
        let binding = config.binding(name)?;
        match state.load::<BindingCheckpoint>(&binding.state_key()).await? {
            Some(checkpoint) => println!("{name}: {}", checkpoint.to_cli_string()),
            None => println!("{name}: no state"),
        }
        return Ok(());
    }

    let files = state.list().await?;
    if files.is_empty() {
        println!("No persisted state");
    }
    for file in files {
        match file.parse::<BindingCheckpoint>() {
            Ok(checkpoint) => println!("{}: {}", file.binding, checkpoint.to_cli_string()),
            Err(e) => println!("{}: unreadable ({e:#})", file.binding),
        }
    }
    Ok(())
}

async fn reset_state(config: &CaptureConfig, opts: &SetupOptions, name: &str) -> anyhow::Result<()> {
    let binding = config.binding(name)?;
    let surreal = setup::connect_surreal(config, opts).await?;
    let state = setup::open_state(config, surreal.as_ref())?;

    let key = binding.state_key();
    if state.reset(&key).await? {
        println!("Reset state of binding '{name}' (key '{key}')");
    } else {
        println!("Binding '{name}' has no persisted state");
    }
    Ok(())
}
