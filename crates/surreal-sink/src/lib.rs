//! SurrealDB sink for batch-capture.
//!
//! Documents of each binding land in their own table. Keyed documents are
//! upserted by key, so replaying a poll is idempotent; unkeyed documents
//! are created. A batch and, optionally, the binding checkpoint are written
//! in one transaction.

mod connect;
mod sink;

pub use connect::{surreal_connect, surreal_connect_with_retries, SurrealOpts};
pub use sink::SurrealSink;
