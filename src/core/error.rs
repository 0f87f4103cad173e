//! Error categories for a benchmark run.
//!
//! Fatal errors ([`BenchError`]) abort the whole run. Task errors
//! ([`TaskError`]) are local to a single (model, image) pair and never
//! propagate past the orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that abort a benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Invalid or unusable configuration, detected before any dispatch.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend could not be brought up for a model.
    #[error("provider error for model '{model}': {source}")]
    Provider {
        model: String,
        #[source]
        source: ProviderError,
    },

    /// The user interrupted the run.
    #[error("benchmark interrupted by user")]
    Interrupted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Process exit code for this category.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Config(_) => 2,
            BenchError::Provider { .. } => 3,
            BenchError::Interrupted => 130,
            BenchError::Io(_) => 1,
        }
    }
}

/// Failure raised by a model backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("process `{program}` failed ({status}): {stderr}")]
    Process {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single (model, image) task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("backend failed: {0}")]
    Backend(#[from] ProviderError),

    #[error("missing ground truth {}", path.display())]
    MissingGroundTruth {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backend returned an empty transcription")]
    EmptyResponse,

    #[error("failed to record result: {0}")]
    Record(String),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Short label used in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Backend(_) => "backend",
            TaskError::MissingGroundTruth { .. } => "ground-truth",
            TaskError::EmptyResponse => "empty-response",
            TaskError::Record(_) => "record",
            TaskError::Panicked(_) => "panic",
        }
    }
}
