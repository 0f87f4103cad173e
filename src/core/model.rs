use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Command,
    Tesseract,
    Ollama,
    Openai,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Command,
        ProviderKind::Tesseract,
        ProviderKind::Ollama,
        ProviderKind::Openai,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Command => "command",
            ProviderKind::Tesseract => "tesseract",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Openai => "openai",
        }
    }

    /// Whether the provider refuses to run without a credential.
    pub fn requires_credential(&self) -> bool {
        matches!(self, ProviderKind::Openai)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown provider '{s}'"))
    }
}

/// A model under evaluation, as configured for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub id: String,
    pub provider: ProviderKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Name of the environment variable holding the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            id: id.into(),
            provider,
            enabled: true,
            api_key_env: None,
            endpoint: None,
            command: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiffOp {
    Equal,
    Insert,
    Delete,
    Replace,
}

/// One aligned span. `expected` comes from the ground truth, `actual` from
/// the prediction; the side not involved in the op is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSpan {
    pub op: DiffOp,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub expected: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actual: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TextDiff {
    pub spans: Vec<DiffSpan>,
}

impl TextDiff {
    /// Characters covered by equal spans.
    pub fn matched_chars(&self) -> usize {
        self.spans
            .iter()
            .filter(|span| span.op == DiffOp::Equal)
            .map(|span| span.expected.chars().count())
            .sum()
    }

    pub fn is_identical(&self) -> bool {
        self.spans.iter().all(|span| span.op == DiffOp::Equal)
    }
}

/// Outcome of one completed (model, image) task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallResult {
    pub model_id: String,
    pub provider: ProviderKind,
    #[serde(rename = "image")]
    pub image_path: PathBuf,
    #[serde(rename = "gt")]
    pub ground_truth: String,
    #[serde(rename = "response")]
    pub prediction: String,
    #[serde(default)]
    pub diff: TextDiff,
    #[serde(rename = "wer")]
    pub word_error_rate: f64,
    #[serde(rename = "cer")]
    pub char_error_rate: f64,
    pub accuracy: f64,
    #[serde(rename = "time")]
    pub exec_time_seconds: f64,
    #[serde(default)]
    pub recorded_at_ms: u64,
}

impl CallResult {
    /// Checks the value ranges a well-formed record must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.model_id.trim().is_empty() {
            return Err("empty model id".to_string());
        }
        let rates = [
            ("wer", self.word_error_rate),
            ("cer", self.char_error_rate),
            ("time", self.exec_time_seconds),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} out of range: {value}"));
            }
        }
        if !(0.0..=1.0).contains(&self.accuracy) {
            return Err(format!("accuracy out of range: {}", self.accuracy));
        }
        Ok(())
    }

    pub fn sample(&self) -> MetricSample {
        MetricSample {
            wer: self.word_error_rate,
            cer: self.char_error_rate,
            accuracy: self.accuracy,
            exec_time: self.exec_time_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub wer: f64,
    pub cer: f64,
    pub accuracy: f64,
    pub exec_time: f64,
}

/// Per-model means over a set of completed tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAggregate {
    pub model_id: String,
    pub count: usize,
    pub mean_wer: f64,
    pub mean_cer: f64,
    pub mean_accuracy: f64,
    pub mean_exec_time: f64,
}

impl ModelAggregate {
    /// Aggregate for a model with no completed tasks. All means are zero.
    pub fn empty(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            count: 0,
            mean_wer: 0.0,
            mean_cer: 0.0,
            mean_accuracy: 0.0,
            mean_exec_time: 0.0,
        }
    }

    /// Folds samples in the order given. Callers that need order
    /// independence sort first.
    pub fn from_samples(model_id: impl Into<String>, samples: &[MetricSample]) -> Self {
        if samples.is_empty() {
            return Self::empty(model_id);
        }
        let n = samples.len() as f64;
        let mean = |f: fn(&MetricSample) -> f64| samples.iter().map(f).sum::<f64>() / n;
        Self {
            model_id: model_id.into(),
            count: samples.len(),
            mean_wer: mean(|s| s.wer),
            mean_cer: mean(|s| s.cer),
            mean_accuracy: mean(|s| s.accuracy),
            mean_exec_time: mean(|s| s.exec_time),
        }
    }
}
