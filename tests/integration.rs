use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use pretty_assertions::assert_eq;

use ocracle::backend::{BackendFactory, OcrBackend, ProviderRegistry, Transcription};
use ocracle::config::{AppConfig, Credentials};
use ocracle::dataset::{discover_images, ground_truth_path, output_folder, select_images};
use ocracle::export::{aggregate_folder, summary_path, write_summary, JsonRecorder, SummaryEntry};
use ocracle::pipeline::{NoopObserver, TaskFailure};
use ocracle::{
    BenchError, CallResult, CancelToken, Evaluator, ModelSpec, ProviderError, ProviderKind,
    RunObserver, TaskError,
};

/// Backend answering from a table keyed by image file name. Images missing
/// from the table fail with a provider error.
struct ScriptedBackend {
    answers: HashMap<String, String>,
}

impl OcrBackend for ScriptedBackend {
    fn transcribe(&self, _prompt: &str, image: &Path) -> Result<Transcription, ProviderError> {
        let name = image.file_name().unwrap().to_string_lossy().into_owned();
        self.answers
            .get(&name)
            .map(|content| Transcription {
                content: content.clone(),
            })
            .ok_or_else(|| ProviderError::Status {
                status: 503,
                body: "model overloaded".to_string(),
            })
    }
}

#[derive(Default)]
struct ScriptedFactory {
    scripts: HashMap<String, HashMap<String, String>>,
}

impl ScriptedFactory {
    fn model(mut self, id: &str, answers: &[(&str, &str)]) -> Self {
        let answers = answers
            .iter()
            .map(|(image, text)| (image.to_string(), text.to_string()))
            .collect();
        self.scripts.insert(id.to_string(), answers);
        self
    }
}

impl BackendFactory for ScriptedFactory {
    fn build(&self, model: &ModelSpec) -> Result<Box<dyn OcrBackend>, BenchError> {
        let answers = self
            .scripts
            .get(&model.id)
            .cloned()
            .ok_or_else(|| BenchError::config(format!("no script for '{}'", model.id)))?;
        Ok(Box::new(ScriptedBackend { answers }))
    }
}

fn specs(ids: &[&str]) -> Vec<ModelSpec> {
    ids.iter()
        .map(|id| ModelSpec::new(*id, ProviderKind::Command))
        .collect()
}

/// Writes `<name>.png` plus its ground truth file for each entry and returns
/// the image paths in order.
fn write_corpus(dir: &Path, lines: &[(&str, &str)]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for (name, gt) in lines {
        let image = dir.join(format!("{name}.png"));
        fs::write(&image, b"\x89PNG")?;
        fs::write(ground_truth_path(&image), format!("{gt}\n"))?;
        images.push(image);
    }
    Ok(images)
}

/// Two models, three images, one failure on the second image
#[test]
fn test_failure_on_one_image_is_isolated() -> Result<()> {
    let corpus = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let images = write_corpus(
        corpus.path(),
        &[("l1", "THE CAT"), ("l2", "A DOG"), ("l3", "SAT DOWN")],
    )?;

    let factory = ScriptedFactory::default()
        .model("alpha", &[("l1.png", "THE CAT"), ("l2.png", "A DOG"), ("l3.png", "SAT DOWN")])
        .model("beta", &[("l1.png", "THE DOG"), ("l3.png", "SAT DOWN")]);
    let recorder = JsonRecorder::new(out.path().to_path_buf());
    let evaluator = Evaluator::new(&specs(&["alpha", "beta"]), &factory, &recorder)?;

    let outcome = evaluator.evaluate(&images, &mut NoopObserver)?;

    assert!(!outcome.interrupted);
    assert_eq!(outcome.images_completed, 3);
    assert_eq!(outcome.aggregate("alpha").unwrap().count, 3);
    assert_eq!(outcome.aggregate("beta").unwrap().count, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].model_id, "beta");
    assert!(matches!(
        outcome.failures[0].error,
        TaskError::Backend(ProviderError::Status { status: 503, .. })
    ));

    let alpha = outcome.aggregate("alpha").unwrap();
    assert_eq!(alpha.mean_accuracy, 1.0);
    assert_eq!(alpha.mean_wer, 0.0);
    // beta: "THE DOG" scores WER 0.5 and CER 3/7, "SAT DOWN" is exact
    let beta = outcome.aggregate("beta").unwrap();
    assert!((beta.mean_wer - 0.25).abs() < 1e-12);
    assert!((beta.mean_cer - 1.5 / 7.0).abs() < 1e-12);

    // the persisted records aggregate to the same figures
    let report = aggregate_folder(out.path())?;
    assert_eq!(report.records, 5);
    for agg in &outcome.aggregates {
        let stored = &report.models[&agg.model_id];
        assert_eq!(stored.count, agg.count);
        assert!((stored.mean_wer - agg.mean_wer).abs() < 1e-12);
        assert!((stored.mean_cer - agg.mean_cer).abs() < 1e-12);
        assert!((stored.mean_accuracy - agg.mean_accuracy).abs() < 1e-12);
    }
    Ok(())
}

/// Observer that requests cancellation once a given number of tasks settled
struct CancelAfter {
    token: CancelToken,
    remaining: usize,
}

impl CancelAfter {
    fn settle(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.token.cancel();
        }
    }
}

impl RunObserver for CancelAfter {
    fn task_completed(&mut self, _result: &CallResult) {
        self.settle();
    }

    fn task_failed(&mut self, _failure: &TaskFailure) {
        self.settle();
    }
}

/// Interrupt after the first of three images
#[test]
fn test_interrupt_keeps_completed_work() -> Result<()> {
    let corpus = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let images = write_corpus(
        corpus.path(),
        &[("l1", "THE CAT"), ("l2", "A DOG"), ("l3", "SAT DOWN")],
    )?;
    let all = [("l1.png", "THE CAT"), ("l2.png", "A DOG"), ("l3.png", "SAT DOWN")];
    let factory = ScriptedFactory::default()
        .model("alpha", &all)
        .model("beta", &all);

    let token = CancelToken::new();
    let recorder = JsonRecorder::new(out.path().to_path_buf());
    let evaluator = Evaluator::new(&specs(&["alpha", "beta"]), &factory, &recorder)?
        .with_cancel(token.clone());
    let mut observer = CancelAfter {
        token,
        remaining: 2,
    };

    let outcome = evaluator.evaluate(&images, &mut observer)?;

    assert!(outcome.interrupted);
    assert_eq!(outcome.images_completed, 1);
    assert_eq!(outcome.images_total, 3);
    assert_eq!(outcome.completed_tasks(), 2);

    let report = aggregate_folder(out.path())?;
    assert_eq!(report.records, 2);
    assert_eq!(report.models["alpha"].count, 1);
    assert_eq!(report.models["beta"].count, 1);
    Ok(())
}

/// Missing ground truth fails only that image, and a model without any
/// result still shows up in the summary
#[test]
fn test_missing_ground_truth_and_empty_model() -> Result<()> {
    let corpus = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let mut images = write_corpus(corpus.path(), &[("l1", "THE CAT")])?;
    let orphan = corpus.path().join("l2.png");
    fs::write(&orphan, b"\x89PNG")?;
    images.push(orphan);

    let factory = ScriptedFactory::default()
        .model("alpha", &[("l1.png", "THE CAT"), ("l2.png", "A DOG")])
        .model("silent", &[]);
    let folder = out.path().join("corpus");
    let recorder = JsonRecorder::new(folder.clone());
    let evaluator = Evaluator::new(&specs(&["alpha", "silent"]), &factory, &recorder)?;

    let outcome = evaluator.evaluate(&images, &mut NoopObserver)?;
    assert_eq!(outcome.aggregate("alpha").unwrap().count, 1);
    let silent = outcome.aggregate("silent").unwrap();
    assert_eq!(silent.count, 0);
    assert!(silent.mean_wer.is_finite() && silent.mean_accuracy == 0.0);

    let missing = outcome
        .failures
        .iter()
        .filter(|f| matches!(f.error, TaskError::MissingGroundTruth { .. }))
        .count();
    assert_eq!(missing, 1);

    let mut report = aggregate_folder(&folder)?;
    report.ensure_models(evaluator.model_ids());
    let path = write_summary(&folder, &report)?;
    assert_eq!(path, summary_path(&folder));

    let summary: HashMap<String, SummaryEntry> = serde_json::from_slice(&fs::read(&path)?)?;
    assert_eq!(summary["alpha"].count, 1);
    assert_eq!(summary["silent"].count, 0);
    Ok(())
}

/// Config file through discovery, sampling and the provider registry
#[cfg(unix)]
#[test]
fn test_config_driven_run_with_command_backend() -> Result<()> {
    let corpus = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    write_corpus(
        corpus.path(),
        &[("0001.nrm", "THE CAT"), ("0002.nrm", "THE CAT"), ("0003.nrm", "THE CAT")],
    )?;

    let toml = format!(
        r#"
request_timeout_secs = 10

[input]
path = "{}"
images_to_process = 2
seed = 7

[output]
root = "{}"

[[models]]
id = "echo"
provider = "command"
command = ["sh", "-c", "printf 'THE CAT'"]

[[models]]
id = "disabled"
provider = "command"
enabled = false
command = ["false"]
"#,
        corpus.path().display(),
        out.path().display()
    );
    let config = AppConfig::from_toml(&toml)?;

    let images = discover_images(&config.input.path)?;
    let images = select_images(images, config.input.images_to_process, config.input.seed);
    assert_eq!(images.len(), 2);

    let folder = output_folder(&config.output.root, &config.input.path);
    let registry = ProviderRegistry::new(
        Credentials::from_env(&config.enabled_models()),
        config.request_timeout(),
    );
    let recorder = JsonRecorder::new(folder.clone());
    let evaluator = Evaluator::new(&config.models, &registry, &recorder)?
        .with_prompt(config.prompt.clone());
    assert_eq!(evaluator.model_ids().collect::<Vec<_>>(), vec!["echo"]);

    let outcome = evaluator.evaluate(&images, &mut NoopObserver)?;
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    let echo = outcome.aggregate("echo").unwrap();
    assert_eq!(echo.count, 2);
    assert_eq!(echo.mean_accuracy, 1.0);

    let report = aggregate_folder(&folder)?;
    assert_eq!(report.records, 2);
    assert!(!report.models.contains_key("disabled"));
    Ok(())
}

/// Fatal conditions are reported before anything is dispatched
#[test]
fn test_configuration_errors_are_fatal() -> Result<()> {
    let empty = tempfile::tempdir()?;
    assert!(matches!(
        discover_images(empty.path()),
        Err(BenchError::Config(_))
    ));

    let mut models = specs(&["alpha"]);
    models[0].enabled = false;
    let recorder = JsonRecorder::new(empty.path().to_path_buf());
    let err = Evaluator::new(&models, &ScriptedFactory::default(), &recorder)
        .err()
        .unwrap();
    assert_eq!(err.exit_code(), 2);
    Ok(())
}

/// Model ids that differ only in punctuation keep one record each
#[test]
fn test_similar_model_ids_do_not_share_records() -> Result<()> {
    let corpus = tempfile::tempdir()?;
    let out = tempfile::tempdir()?;
    let images = write_corpus(corpus.path(), &[("l1", "THE CAT")])?;

    let factory = ScriptedFactory::default()
        .model("org/model", &[("l1.png", "THE CAT")])
        .model("org:model", &[("l1.png", "THE DOG")])
        .model("org_model", &[("l1.png", "THE CAT")]);
    let recorder = JsonRecorder::new(out.path().to_path_buf());
    let evaluator = Evaluator::new(
        &specs(&["org/model", "org:model", "org_model"]),
        &factory,
        &recorder,
    )?;

    let outcome = evaluator.evaluate(&images, &mut NoopObserver)?;
    assert_eq!(outcome.completed_tasks(), 3);

    let report = aggregate_folder(out.path())?;
    assert_eq!(report.records, outcome.completed_tasks());
    for agg in &outcome.aggregates {
        assert_eq!(report.models[&agg.model_id].mean_accuracy, agg.mean_accuracy);
    }
    Ok(())
}
