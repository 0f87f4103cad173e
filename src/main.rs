use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use ocracle::backend::ProviderRegistry;
use ocracle::config::{AppConfig, Credentials, DEFAULT_CONFIG_PATH};
use ocracle::dataset::{discover_images, output_folder, select_images, source_name};
use ocracle::export::{aggregate_folder, write_summary, JsonRecorder};
use ocracle::report::{print_report, print_summary, render_diff, ConsoleReporter};
use ocracle::{BenchError, CancelToken, Evaluator};

#[derive(Parser, Debug)]
#[command(name = "ocracle")]
#[command(version, about = "Benchmark OCR-capable models against ground truth transcriptions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging on stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate every enabled model on a sample of images
    Run {
        /// Source folder with *.png images and *.gt.txt ground truth
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Number of images to sample
        #[arg(short = 'n', long)]
        images: Option<usize>,

        /// Seed for reproducible image sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Output root for records and summaries
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only run these model ids (repeatable)
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// Only print failures and the final summary
        #[arg(short, long)]
        quiet: bool,
    },

    /// Recompute the summary of a record folder
    Aggregate {
        /// Folder holding per-call records
        folder: PathBuf,
    },

    /// Score a prediction file against a ground truth file
    Score {
        ground_truth: PathBuf,
        prediction: PathBuf,
    },

    /// List configured models
    Models,
}

fn main() {
    let cli = Cli::parse();
    ocracle::init_tracing(cli.verbose);

    if let Err(err) = dispatch(cli) {
        let code = err
            .downcast_ref::<BenchError>()
            .map_or(1, BenchError::exit_code);
        eprintln!("[{}] {err:#}", style("✗").red());
        std::process::exit(code);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            source,
            images,
            seed,
            output,
            models,
            quiet,
        } => {
            let mut config = AppConfig::load(&cli.config)?;
            if let Some(source) = source {
                config.input.path = source;
            }
            if let Some(images) = images {
                config.input.images_to_process = images;
            }
            if seed.is_some() {
                config.input.seed = seed;
            }
            if let Some(output) = output {
                config.output.root = output;
            }
            config.restrict_to(&models)?;
            config.validate()?;
            run_benchmark(&config, quiet)
        }
        Commands::Aggregate { folder } => aggregate(folder),
        Commands::Score {
            ground_truth,
            prediction,
        } => score_files(ground_truth, prediction),
        Commands::Models => list_models(&cli.config),
    }
}

fn run_benchmark(config: &AppConfig, quiet: bool) -> Result<()> {
    let source = &config.input.path;
    let credentials = Credentials::from_env(&config.enabled_models());
    let registry = ProviderRegistry::new(credentials, config.request_timeout());

    let images = discover_images(source)?;
    let images = select_images(images, config.input.images_to_process, config.input.seed);
    let folder = output_folder(&config.output.root, source);
    let recorder = JsonRecorder::new(folder.clone());

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone())?;

    let evaluator = Evaluator::new(&config.models, &registry, &recorder)?
        .with_prompt(config.prompt.clone())
        .with_cancel(cancel);

    if !quiet {
        println!("[*] Source: {}", source.display());
        println!("[*] Images: {}", images.len());
        println!(
            "[*] Models: {}",
            evaluator.model_ids().collect::<Vec<_>>().join(", ")
        );
        println!("[*] Output: {}", folder.display());
    }

    let mut reporter = ConsoleReporter::new(quiet);
    let mut outcome = evaluator.evaluate(&images, &mut reporter)?;

    // The folder may hold records of earlier runs; its summary covers all of them.
    let mut report = aggregate_folder(&folder)
        .with_context(|| format!("Failed to aggregate: {}", folder.display()))?;
    report.ensure_models(evaluator.model_ids());
    let summary = write_summary(&folder, &report)
        .with_context(|| format!("Failed to write summary for: {}", folder.display()))?;

    print_summary(&source_name(source), &outcome.aggregates);
    println!(
        "\n[*] {} succeeded, {} failed, {}/{} images",
        reporter.completed(),
        reporter.failed(),
        outcome.images_completed,
        outcome.images_total
    );
    println!("[✓] Summary saved to: {}", summary.display());

    if let Some(err) = outcome.aborted.take() {
        return Err(err.into());
    }
    if outcome.interrupted {
        return Err(BenchError::Interrupted.into());
    }
    Ok(())
}

/// First Ctrl-C stops dispatching new images, the second exits at once.
fn install_interrupt_handler(cancel: CancelToken) -> Result<()> {
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            eprintln!("\n[!] Aborted");
            std::process::exit(BenchError::Interrupted.exit_code());
        }
        eprintln!("\n[!] Interrupted, finishing the current image (Ctrl-C again to abort)");
        cancel.cancel();
    })
    .context("Failed to install Ctrl-C handler")
}

fn aggregate(folder: PathBuf) -> Result<()> {
    if !folder.is_dir() {
        anyhow::bail!("Record folder does not exist: {}", folder.display());
    }
    let report = aggregate_folder(&folder)
        .with_context(|| format!("Failed to aggregate: {}", folder.display()))?;
    let summary = write_summary(&folder, &report)?;

    print_report(&source_name(&folder), &report);
    println!("\n[*] {} record(s), {} skipped", report.records, report.skipped.len());
    println!("[✓] Summary saved to: {}", summary.display());
    Ok(())
}

fn score_files(ground_truth: PathBuf, prediction: PathBuf) -> Result<()> {
    let expected = fs::read_to_string(&ground_truth)
        .with_context(|| format!("Failed to read: {}", ground_truth.display()))?;
    let actual = fs::read_to_string(&prediction)
        .with_context(|| format!("Failed to read: {}", prediction.display()))?;

    let score = ocracle::metrics::score(&expected, &actual);
    println!("diff:     {}", render_diff(&score.diff));
    println!("WER:      {:.2}%", score.word_error_rate * 100.0);
    println!("CER:      {:.2}%", score.char_error_rate * 100.0);
    println!("accuracy: {:.2}%", score.accuracy * 100.0);
    Ok(())
}

fn list_models(config_path: &Path) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let credentials = Credentials::from_env(&config.models);

    println!("{:<28} {:<10} {:<8} credential", "model", "provider", "enabled");
    for model in &config.models {
        let credential = match &model.api_key_env {
            Some(var) if credentials.is_set(&model.id) => format!("${var} set"),
            Some(var) => format!("${var} missing"),
            None if model.provider.requires_credential() => "not configured".to_string(),
            None => "-".to_string(),
        };
        println!(
            "{:<28} {:<10} {:<8} {}",
            model.id,
            model.provider.as_str(),
            if model.enabled { "yes" } else { "no" },
            credential
        );
    }
    Ok(())
}
