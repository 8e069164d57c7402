//! Core types for the batch-capture engine.
//!
//! This crate provides the foundational types shared by the engine, the
//! source connectors and the sinks:
//!
//! - [`ColumnType`] - Source-agnostic column types and the JSON type mapping table
//! - [`Value`] / [`Row`] - Tagged column values with cursor ordering
//! - [`TableRef`] / [`TableDefinition`] - Table references and discovered definitions
//! - [`Query`] / [`Dialect`] - Rendered queries
//! - [`SourceConnector`] / [`SourceSession`] - Connection provider and row streaming
//! - [`Document`] / [`DocumentSink`] - Emitted documents and their destination
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint                 (cursor and snapshot persistence)
//!    ├─── postgresql-source          (implements SourceConnector)
//!    ├─── surreal-sink               (writes Documents to SurrealDB)
//!    └─── batch-capture              (renderer, scheduler, engine, committer)
//! ```

pub mod document;
pub mod query;
pub mod schema;
pub mod source;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use document::{Document, DocumentSink, Operation};
pub use query::{CursorPredicate, Dialect, Query};
pub use schema::{ColumnDefinition, SchemaError, TableDefinition, TableRef};
pub use source::{RowStream, SourceConnector, SourceError, SourceSession};
pub use types::ColumnType;
pub use values::{compare_tuples, Row, TimezonePolicy, Value};
