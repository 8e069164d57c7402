//! batch-capture
//!
//! Incremental batch capture from SQL databases. Each configured binding
//! polls a table or query on its own schedule, emits one JSON document per
//! row, and persists a cursor so the next poll reads only what changed.
//!
//! # Components
//!
//! - [`render`] - turns a binding and its persisted cursor into a query
//! - [`schedule`] - per-binding poll state machines
//! - [`execute`] - runs a query and translates rows into documents
//! - [`commit`] - appends documents, then advances the checkpoint
//! - [`deletion`] - infers deleted rows for full-refresh bindings
//! - [`capture`] - runs every binding in its own task
//!
//! Sources implement [`sync_core::SourceConnector`]; PostgreSQL support lives
//! in the `batch-capture-postgresql-source` crate. Checkpoints are stored
//! through the `checkpoint` crate; SurrealDB output through `surreal-sink`.
//!
//! # CLI Usage
//!
//! ```bash
//! # Run every binding until interrupted
//! batch-capture run --config capture.yaml
//!
//! # Poll two bindings once and exit
//! batch-capture run --config capture.yaml --once --binding users --binding orders
//!
//! # Show the query a binding would run next
//! batch-capture render --config capture.yaml --binding users
//!
//! # Forget a binding's cursor so it backfills again
//! batch-capture state reset --config capture.yaml --binding users
//! ```

pub mod capture;
pub mod commit;
pub mod config;
pub mod deletion;
pub mod error;
pub mod execute;
pub mod render;
pub mod schedule;
pub mod setup;
pub mod sink;
pub mod state;
pub mod testing;

pub use capture::{BindingReport, Capture, CaptureReport, CaptureSettings, Preflight};
pub use commit::{AppendThenAdvance, CommitError, Committer, SurrealCommitter};
pub use config::{BindingConfig, CaptureConfig, PollSchedule};
pub use error::{CaptureError, ErrorClass};
pub use render::{QueryRenderer, RenderError};
pub use schedule::{BindingSchedule, Clock, SystemClock};
pub use state::{BindingCheckpoint, CursorState, Progress};
