//! Console output for a benchmark run.

use std::path::Path;

use console::style;

use crate::core::model::{CallResult, DiffOp, ModelAggregate, TextDiff};
use crate::export::AggregateReport;
use crate::pipeline::{RunObserver, TaskFailure};

/// Prints each result as it arrives. With `quiet` set only failures are shown.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    quiet: bool,
    completed: usize,
    failed: usize,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            ..Self::default()
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }
}

impl RunObserver for ConsoleReporter {
    fn image_started(&mut self, index: usize, total: usize, image: &Path) {
        if self.quiet {
            return;
        }
        println!(
            "\n[{}/{}] {}",
            index + 1,
            total,
            style(image.display()).bold()
        );
    }

    fn task_completed(&mut self, result: &CallResult) {
        self.completed += 1;
        if self.quiet {
            return;
        }
        println!("{}", format_result(result));
        println!("{}", style("-".repeat(60)).dim());
    }

    fn task_failed(&mut self, failure: &TaskFailure) {
        self.failed += 1;
        eprintln!(
            "  [{}] {} on {}: {}",
            style("✗").red(),
            failure.model_id,
            failure
                .image_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            failure.error
        );
    }
}

pub fn format_result(result: &CallResult) -> String {
    format!(
        "  [+] {}\n      response: {}\n      diff:     {}\n      WER {}  CER {}  accuracy {}  time {:.2}s",
        style(&result.model_id).cyan(),
        result.prediction,
        render_diff(&result.diff),
        percent(result.word_error_rate),
        percent(result.char_error_rate),
        percent(result.accuracy),
        result.exec_time_seconds
    )
}

/// Inline diff: removed ground truth in red, inserted prediction in green.
pub fn render_diff(diff: &TextDiff) -> String {
    let mut out = String::new();
    for span in &diff.spans {
        match span.op {
            DiffOp::Equal => out.push_str(&span.expected),
            DiffOp::Delete => out.push_str(&style(&span.expected).red().strikethrough().to_string()),
            DiffOp::Insert => out.push_str(&style(&span.actual).green().to_string()),
            DiffOp::Replace => {
                out.push_str(&style(&span.expected).red().strikethrough().to_string());
                out.push_str(&style(&span.actual).green().to_string());
            }
        }
    }
    out
}

fn percent(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

/// Prints the per-model table for a finished (or interrupted) run.
pub fn print_summary(source: &str, aggregates: &[ModelAggregate]) {
    println!();
    println!("{}", style("=".repeat(72)).dim());
    println!("{} {}", style("RESULTS").bold(), source);
    println!("{}", style("=".repeat(72)).dim());
    println!(
        "{:<28} {:>6} {:>9} {:>9} {:>9} {:>8}",
        "model", "count", "WER", "CER", "accuracy", "time"
    );
    for agg in aggregates {
        let accuracy = percent(agg.mean_accuracy);
        let accuracy = if agg.count == 0 {
            style(accuracy).dim()
        } else if agg.mean_accuracy >= 0.9 {
            style(accuracy).green()
        } else if agg.mean_accuracy >= 0.7 {
            style(accuracy).yellow()
        } else {
            style(accuracy).red()
        };
        println!(
            "{:<28} {:>6} {:>9} {:>9} {:>9} {:>7.2}s",
            agg.model_id,
            agg.count,
            percent(agg.mean_wer),
            percent(agg.mean_cer),
            accuracy,
            agg.mean_exec_time
        );
    }
}

/// Prints the summary of a folder aggregate, including skipped records.
pub fn print_report(source: &str, report: &AggregateReport) {
    let aggregates: Vec<ModelAggregate> = report.models.values().cloned().collect();
    print_summary(source, &aggregates);
    for skipped in &report.skipped {
        eprintln!(
            "  [{}] skipped {}: {}",
            style("!").yellow(),
            skipped.path.display(),
            skipped.reason
        );
    }
}
