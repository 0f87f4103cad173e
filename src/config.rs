//! Run configuration loaded from a TOML file.
//!
//! The file describes the source folder, the output root and the models to
//! benchmark. Provider credentials are resolved once into a [`Credentials`]
//! snapshot that backends receive at construction time.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::BenchError;
use crate::core::model::{ModelSpec, ProviderKind};

pub const DEFAULT_CONFIG_PATH: &str = "ocracle.toml";
pub const DEFAULT_OUTPUT_ROOT: &str = "docs/json";
pub const DEFAULT_PROMPT: &str = "What text do you see in this image? Please provide an accurate transcription. Return only the transcription, nothing else.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub path: PathBuf,
    #[serde(default = "default_images_to_process")]
    pub images_to_process: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
        }
    }
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_images_to_process() -> usize {
    3
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, BenchError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BenchError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), models = config.models.len(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, BenchError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| BenchError::config(format!("failed to parse TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.prompt.trim().is_empty() {
            return Err(BenchError::config("prompt must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(BenchError::config("request_timeout_secs must be positive"));
        }
        if self.input.images_to_process == 0 {
            return Err(BenchError::config("input.images_to_process must be at least 1"));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(BenchError::config("model id must not be empty"));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(BenchError::config(format!("duplicate model id '{}'", model.id)));
            }
            if model.provider == ProviderKind::Command
                && model.command.as_ref().map_or(true, |argv| argv.is_empty())
            {
                return Err(BenchError::config(format!(
                    "model '{}' uses the command provider but has no command",
                    model.id
                )));
            }
        }
        Ok(())
    }

    /// Models that take part in a run, in configuration order.
    pub fn enabled_models(&self) -> Vec<ModelSpec> {
        self.models.iter().filter(|m| m.enabled).cloned().collect()
    }

    /// Enables exactly the listed models and disables every other one.
    pub fn restrict_to(&mut self, ids: &[String]) -> Result<(), BenchError> {
        if ids.is_empty() {
            return Ok(());
        }
        for id in ids {
            if !self.models.iter().any(|m| &m.id == id) {
                return Err(BenchError::config(format!("unknown model '{id}'")));
            }
        }
        for model in &mut self.models {
            model.enabled = ids.contains(&model.id);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Provider credentials resolved once before any dispatch. Read-only after
/// construction.
#[derive(Clone, Default)]
pub struct Credentials {
    keys: HashMap<String, String>,
}

impl Credentials {
    /// Resolves credentials for every model from the process environment.
    pub fn from_env(models: &[ModelSpec]) -> Self {
        Self::resolve(models, |name| std::env::var(name).ok())
    }

    pub fn resolve(models: &[ModelSpec], lookup: impl Fn(&str) -> Option<String>) -> Self {
        let keys = models
            .iter()
            .filter_map(|model| {
                let name = model.api_key_env.as_deref()?;
                let value = lookup(name).filter(|v| !v.trim().is_empty())?;
                Some((model.id.clone(), value))
            })
            .collect();
        Self { keys }
    }

    pub fn get(&self, model_id: &str) -> Option<&str> {
        self.keys.get(model_id).map(String::as_str)
    }

    pub fn is_set(&self, model_id: &str) -> bool {
        self.keys.contains_key(model_id)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("Credentials").field("models", &ids).finish()
    }
}
