//! Source connector traits.
//!
//! A [`SourceConnector`] is the connection provider: given its endpoint
//! configuration it yields [`SourceSession`]s. Authentication, TLS and
//! tunnelling are the connector's business. A session describes tables and
//! executes rendered queries, streaming rows back.

use crate::query::{Dialect, Query};
use crate::schema::{TableDefinition, TableRef};
use crate::values::Row;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Stream of rows produced by a query.
pub type RowStream<'a> = BoxStream<'a, Result<Row, SourceError>>;

/// Classified source failure.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network drop, timeout, server unavailable; retried at the next slot
    #[error("Source connection error: {0}")]
    Connection(String),

    /// The source refused the query (syntax error, unknown relation or column)
    #[error("Source rejected query: {0}")]
    Rejected(String),

    /// A value could not be converted into the engine's value model
    #[error("Source value conversion failed: {0}")]
    Conversion(String),
}

impl SourceError {
    /// Whether retrying later may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Connection(_))
    }
}

/// Connection provider for a source system.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Source type identifier (e.g., "postgres", "memory").
    fn source_type(&self) -> &'static str;

    /// Dialect queries must be rendered in.
    fn dialect(&self) -> Dialect;

    /// Open a new session.
    async fn connect(&self) -> Result<Box<dyn SourceSession>, SourceError>;
}

/// An open session against a source system.
#[async_trait]
pub trait SourceSession: Send {
    /// Describe a table, returning `None` if it does not exist.
    async fn describe_table(
        &mut self,
        table: &TableRef,
    ) -> Result<Option<TableDefinition>, SourceError>;

    /// Execute a query and stream its rows.
    async fn query<'a>(&'a mut self, query: &Query) -> Result<RowStream<'a>, SourceError>;

    /// Startup sanity checks.
    ///
    /// Returns human-readable problems that make capture unsafe with the
    /// given poll timeout. An empty vector means no problems.
    async fn sanity_check(&mut self, _poll_timeout: Duration) -> Result<Vec<String>, SourceError> {
        Ok(Vec::new())
    }
}
