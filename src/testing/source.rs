use async_trait::async_trait;
use futures::StreamExt;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sync_core::{
    compare_tuples, CursorPredicate, Dialect, Query, Row, RowStream, SourceConnector, SourceError,
    SourceSession, TableDefinition, TableRef, Value,
};

#[derive(Debug, Default)]
struct Table {
    definition: Option<TableDefinition>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Inner {
    dialect: Dialect,
    tables: BTreeMap<String, Table>,
    fail_connects: u32,
    fail_after_rows: Option<usize>,
    fail_queries: u32,
    stall_queries: u32,
    reject_queries: u32,
    sanity_problems: Vec<String>,
    queries: Vec<Query>,
}

/// In-memory table source.
///
/// Queries are not parsed: the source reads the table a query names and
/// applies its structured cursor predicate, returning rows in cursor order
/// with NULL cursors last, the way `ORDER BY ... ASC` would.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        let source = Self::default();
        source.lock().dialect = dialect;
        source
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a table. Rows may be added before or after.
    pub fn create_table(&self, definition: TableDefinition) {
        let name = definition.table.table.clone();
        self.lock().tables.entry(name).or_default().definition = Some(definition);
    }

    pub fn insert(&self, table: &str, row: Row) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .rows
            .push(row);
    }

    /// Replace every row of `table`.
    pub fn set_rows(&self, table: &str, rows: Vec<Row>) {
        self.lock().tables.entry(table.to_string()).or_default().rows = rows;
    }

    /// Delete rows of `table` matching `predicate`.
    pub fn delete_where(&self, table: &str, predicate: impl Fn(&Row) -> bool) {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.rows.retain(|row| !predicate(row));
        }
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects = n;
    }

    /// Drop the connection after streaming `rows` rows of the next query.
    pub fn fail_after_rows(&self, rows: usize) {
        self.lock().fail_after_rows = Some(rows);
    }

    /// Fail the next `n` queries with a connection error.
    pub fn fail_next_queries(&self, n: u32) {
        self.lock().fail_queries = n;
    }

    /// Make the next `n` queries hang forever.
    pub fn stall_next_queries(&self, n: u32) {
        self.lock().stall_queries = n;
    }

    /// Make the next `n` queries fail as rejected.
    pub fn reject_next_queries(&self, n: u32) {
        self.lock().reject_queries = n;
    }

    /// Problems reported by the startup sanity check.
    pub fn set_sanity_problems(&self, problems: Vec<String>) {
        self.lock().sanity_problems = problems;
    }

    /// Every query executed so far.
    pub fn queries(&self) -> Vec<Query> {
        self.lock().queries.clone()
    }

    /// Queries executed against `table`.
    pub fn queries_for(&self, table: &str) -> Vec<Query> {
        self.lock()
            .queries
            .iter()
            .filter(|q| q.table.as_ref().is_some_and(|t| t.table == table))
            .cloned()
            .collect()
    }
}

fn cursor_values(row: &Row, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

fn matches(row: &Row, predicate: &CursorPredicate) -> bool {
    let Some(after) = &predicate.after else {
        return true;
    };
    let values = cursor_values(row, &predicate.columns);
    if values.iter().any(Value::is_null) {
        return false;
    }
    match compare_tuples(&values, after) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Equal) => predicate.inclusive,
        _ => false,
    }
}

fn cursor_order(a: &Row, b: &Row, columns: &[String]) -> Ordering {
    for column in columns {
        let x = a.get(column).unwrap_or(&Value::Null);
        let y = b.get(column).unwrap_or(&Value::Null);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => x.compare(y).unwrap_or(Ordering::Equal),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl SourceConnector for MemorySource {
    fn source_type(&self) -> &'static str {
        "memory"
    }

    fn dialect(&self) -> Dialect {
        self.lock().dialect
    }

    async fn connect(&self) -> Result<Box<dyn SourceSession>, SourceError> {
        let mut inner = self.lock();
        if inner.fail_connects > 0 {
            inner.fail_connects -= 1;
            return Err(SourceError::Connection(
                "injected connection failure".to_string(),
            ));
        }
        Ok(Box::new(MemorySession {
            source: self.clone(),
        }))
    }
}

struct MemorySession {
    source: MemorySource,
}

#[async_trait]
impl SourceSession for MemorySession {
    async fn describe_table(
        &mut self,
        table: &TableRef,
    ) -> Result<Option<TableDefinition>, SourceError> {
        Ok(self
            .source
            .lock()
            .tables
            .get(&table.table)
            .and_then(|t| t.definition.clone()))
    }

    async fn query<'a>(&'a mut self, query: &Query) -> Result<RowStream<'a>, SourceError> {
        let stall = {
            let mut inner = self.source.lock();
            inner.queries.push(query.clone());
            if inner.reject_queries > 0 {
                inner.reject_queries -= 1;
                return Err(SourceError::Rejected("injected query rejection".to_string()));
            }
            if inner.fail_queries > 0 {
                inner.fail_queries -= 1;
                return Err(SourceError::Connection(
                    "injected connection drop".to_string(),
                ));
            }
            if inner.stall_queries > 0 {
                inner.stall_queries -= 1;
                true
            } else {
                false
            }
        };
        if stall {
            futures::future::pending::<()>().await;
        }

        let mut inner = self.source.lock();
        let Some(table) = query.table.as_ref() else {
            return Err(SourceError::Rejected(
                "memory source needs a table to read".to_string(),
            ));
        };
        let Some(stored) = inner.tables.get(&table.table) else {
            return Err(SourceError::Rejected(format!(
                "relation \"{table}\" does not exist"
            )));
        };

        let mut rows: Vec<Row> = match &query.cursor {
            Some(predicate) => {
                let mut rows: Vec<Row> = stored
                    .rows
                    .iter()
                    .filter(|row| matches(row, predicate))
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| cursor_order(a, b, &predicate.columns));
                rows
            }
            None => stored.rows.clone(),
        };

        let fail_after = inner.fail_after_rows.take();
        let mut items: Vec<Result<Row, SourceError>> = Vec::with_capacity(rows.len() + 1);
        match fail_after {
            Some(n) if n < rows.len() => {
                rows.truncate(n);
                items.extend(rows.into_iter().map(Ok));
                items.push(Err(SourceError::Connection(
                    "connection reset mid-stream".to_string(),
                )));
            }
            _ => items.extend(rows.into_iter().map(Ok)),
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn sanity_check(&mut self, _poll_timeout: Duration) -> Result<Vec<String>, SourceError> {
        Ok(self.source.lock().sanity_problems.clone())
    }
}
