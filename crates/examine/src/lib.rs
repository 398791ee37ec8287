//! HTTP examiner (C4) and test manager (C5): one-shot link probing plus
//! a bounded worker pool that runs it over a link list with streaming
//! results, progress callbacks, and batched persistence.

pub mod examine;
pub mod manager;
pub mod model;

pub use examine::{examine, examine_with_retries, ExamineOptions};
pub use manager::{run_tests, spawn_persistence_sink, SqlSink, TestManagerOptions};
pub use model::{dedup_links, sort_results, Status, TestResult};
