pub mod aggregate;
pub mod recorder;

use anyhow::Result;

use crate::core::model::CallResult;

pub use aggregate::{aggregate_folder, summary_path, write_summary, AggregateReport, SkippedRecord, SummaryEntry};
pub use recorder::JsonRecorder;

/// Durable destination for call results. Called from worker threads, one
/// call per completed task, so implementations must accept concurrent writes.
pub trait ResultSink: Send + Sync {
    fn record(&self, result: &CallResult) -> Result<()>;
}
