//! Evaluation orchestrator.
//!
//! Images are processed strictly one after another. For each image every
//! enabled model runs on its own worker of a pool that lives only for that
//! image; results are consumed in completion order on the calling thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rayon::ThreadPoolBuilder;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendFactory, OcrBackend};
use crate::config::DEFAULT_PROMPT;
use crate::core::error::{BenchError, TaskError};
use crate::core::model::{CallResult, MetricSample, ModelAggregate, ModelSpec};
use crate::dataset::read_ground_truth;
use crate::export::ResultSink;
use crate::metrics::{normalize, score};

/// Shared interruption flag. Once set, no further image is dispatched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callbacks, always invoked on the coordinating thread.
pub trait RunObserver {
    fn image_started(&mut self, _index: usize, _total: usize, _image: &Path) {}
    fn task_completed(&mut self, _result: &CallResult) {}
    fn task_failed(&mut self, _failure: &TaskFailure) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

#[derive(Debug)]
pub struct TaskFailure {
    pub model_id: String,
    pub image_path: PathBuf,
    pub error: TaskError,
}

#[derive(Debug)]
pub struct EvaluationOutcome {
    /// One entry per enabled model, in configuration order.
    pub aggregates: Vec<ModelAggregate>,
    pub failures: Vec<TaskFailure>,
    pub images_total: usize,
    pub images_completed: usize,
    pub interrupted: bool,
    /// Fatal error that stopped the run early. Work completed before it is
    /// still reflected in `aggregates`.
    pub aborted: Option<BenchError>,
}

impl EvaluationOutcome {
    pub fn aggregate(&self, model_id: &str) -> Option<&ModelAggregate> {
        self.aggregates.iter().find(|a| a.model_id == model_id)
    }

    pub fn completed_tasks(&self) -> usize {
        self.aggregates.iter().map(|a| a.count).sum()
    }
}

struct Agent {
    spec: ModelSpec,
    backend: Box<dyn OcrBackend>,
}

pub struct Evaluator<'a> {
    agents: Vec<Agent>,
    prompt: String,
    sink: &'a dyn ResultSink,
    cancel: CancelToken,
}

impl<'a> Evaluator<'a> {
    /// Builds one backend per enabled model. This happens once, before any
    /// image is touched; a model that cannot be built fails the whole run.
    pub fn new(
        models: &[ModelSpec],
        factory: &dyn BackendFactory,
        sink: &'a dyn ResultSink,
    ) -> Result<Self, BenchError> {
        let agents = models
            .iter()
            .filter(|m| m.enabled)
            .map(|spec| {
                Ok(Agent {
                    backend: factory.build(spec)?,
                    spec: spec.clone(),
                })
            })
            .collect::<Result<Vec<_>, BenchError>>()?;

        if agents.is_empty() {
            return Err(BenchError::config("no models enabled for evaluation"));
        }
        info!(models = agents.len(), "backends ready");

        Ok(Self {
            agents,
            prompt: DEFAULT_PROMPT.to_string(),
            sink,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.spec.id.as_str())
    }

    /// Runs every enabled model on every image and returns per-model means
    /// over the successful tasks.
    ///
    /// Task failures are reported to `observer` and collected in the outcome;
    /// they never stop the run. When the cancel token is set the current
    /// image is allowed to settle, no further image is dispatched, and the
    /// outcome is returned with `interrupted` set. A fatal error while
    /// dispatching an image ends the run the same way and is kept in
    /// `aborted`.
    pub fn evaluate(
        &self,
        images: &[PathBuf],
        observer: &mut dyn RunObserver,
    ) -> Result<EvaluationOutcome, BenchError> {
        self.drive(images, observer, |image, samples, failures, observer| {
            self.evaluate_image(image, samples, failures, observer)
        })
    }

    fn drive<F>(
        &self,
        images: &[PathBuf],
        observer: &mut dyn RunObserver,
        mut dispatch: F,
    ) -> Result<EvaluationOutcome, BenchError>
    where
        F: FnMut(&Path, &mut [Vec<MetricSample>], &mut Vec<TaskFailure>, &mut dyn RunObserver) -> Result<(), BenchError>,
    {
        if images.is_empty() {
            return Err(BenchError::config("no images to evaluate"));
        }

        let mut samples: Vec<Vec<MetricSample>> = vec![Vec::new(); self.agents.len()];
        let mut failures = Vec::new();
        let mut images_completed = 0;
        let mut interrupted = false;
        let mut aborted = None;

        for (index, image) in images.iter().enumerate() {
            if self.cancel.is_cancelled() {
                interrupted = true;
                info!(completed = images_completed, total = images.len(), "run interrupted, no further images dispatched");
                break;
            }
            observer.image_started(index, images.len(), image);
            if let Err(err) = dispatch(image.as_path(), samples.as_mut_slice(), &mut failures, &mut *observer) {
                error!(image = %image.display(), completed = images_completed, "run aborted: {err}");
                aborted = Some(err);
                break;
            }
            images_completed += 1;
        }
        // a cancel that arrived while the last image was in flight
        interrupted |= self.cancel.is_cancelled();

        let aggregates = self
            .agents
            .iter()
            .zip(&samples)
            .map(|(agent, samples)| ModelAggregate::from_samples(agent.spec.id.clone(), samples))
            .collect();

        Ok(EvaluationOutcome {
            aggregates,
            failures,
            images_total: images.len(),
            images_completed,
            interrupted,
            aborted,
        })
    }

    fn evaluate_image(
        &self,
        image: &Path,
        samples: &mut [Vec<MetricSample>],
        failures: &mut Vec<TaskFailure>,
        observer: &mut dyn RunObserver,
    ) -> Result<(), BenchError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.agents.len())
            .thread_name(|i| format!("ocracle-worker-{i}"))
            .build()
            .map_err(|e| BenchError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        debug!(image = %image.display(), units = self.agents.len(), "dispatching");
        let (tx, rx) = mpsc::channel::<(usize, Result<CallResult, TaskError>)>();
        let prompt = self.prompt.as_str();
        let sink = self.sink;

        pool.in_place_scope(|scope| {
            for (slot, agent) in self.agents.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let outcome = run_task(agent, prompt, image, sink);
                    // the receiver outlives every unit of this scope
                    let _ = tx.send((slot, outcome));
                });
            }
            drop(tx);

            for (slot, outcome) in rx {
                let model_id = &self.agents[slot].spec.id;
                match outcome {
                    Ok(result) => {
                        samples[slot].push(result.sample());
                        observer.task_completed(&result);
                    }
                    Err(error) => {
                        warn!(model = %model_id, image = %image.display(), kind = error.kind(), "task failed: {error}");
                        let failure = TaskFailure {
                            model_id: model_id.clone(),
                            image_path: image.to_path_buf(),
                            error,
                        };
                        observer.task_failed(&failure);
                        failures.push(failure);
                    }
                }
            }
        });
        Ok(())
    }
}

fn run_task(
    agent: &Agent,
    prompt: &str,
    image: &Path,
    sink: &dyn ResultSink,
) -> Result<CallResult, TaskError> {
    panic::catch_unwind(AssertUnwindSafe(|| execute_task(agent, prompt, image, sink)))
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))))
}

fn execute_task(
    agent: &Agent,
    prompt: &str,
    image: &Path,
    sink: &dyn ResultSink,
) -> Result<CallResult, TaskError> {
    let started = Instant::now();
    let response = agent.backend.transcribe(prompt, image);
    let exec_time_seconds = started.elapsed().as_secs_f64();

    let transcription = response?;
    if transcription.content.trim().is_empty() {
        return Err(TaskError::EmptyResponse);
    }

    let ground_truth = read_ground_truth(image)?;
    let score = score(&ground_truth, &transcription.content);

    let result = CallResult {
        model_id: agent.spec.id.clone(),
        provider: agent.spec.provider,
        image_path: image.to_path_buf(),
        ground_truth: normalize(&ground_truth).to_string(),
        prediction: normalize(&transcription.content).to_string(),
        diff: score.diff,
        word_error_rate: score.word_error_rate,
        char_error_rate: score.char_error_rate,
        accuracy: score.accuracy,
        exec_time_seconds,
        recorded_at_ms: now_ms(),
    };
    sink.record(&result)
        .map_err(|e| TaskError::Record(format!("{e:#}")))?;
    Ok(result)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
