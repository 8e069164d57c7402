//! In-process doubles for exercising captures without external services.
//!
//! - [`MemorySource`] - scriptable source with failure injection
//! - [`MemorySink`] - collects appended documents
//! - [`FaultyStore`] - checkpoint store wrapper that fails on demand
//! - [`TokioClock`] - clock driven by tokio time, so `start_paused` tests
//!   can fast-forward schedules

pub mod clock;
pub mod sink;
pub mod source;
pub mod store;

pub use clock::TokioClock;
pub use sink::MemorySink;
pub use source::MemorySource;
pub use store::FaultyStore;
