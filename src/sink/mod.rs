//! Local document sinks.
//!
//! The SurrealDB sink lives in the `surreal-sink` crate; this module holds
//! the file-based sink used for local runs and inspection.

mod jsonl;

pub use jsonl::JsonlSink;
