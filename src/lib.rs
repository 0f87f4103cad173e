pub mod backend;
pub mod config;
pub mod core;
pub mod dataset;
pub mod export;
pub mod metrics;
pub mod pipeline;
pub mod report;

pub use crate::core::error::{BenchError, ProviderError, TaskError};
pub use crate::core::model::{CallResult, ModelAggregate, ModelSpec, ProviderKind};
pub use pipeline::{CancelToken, EvaluationOutcome, Evaluator, RunObserver};

/// Installs the stderr log subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects `debug` and the
/// default is `warn`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
