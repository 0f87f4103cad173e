use std::path::Path;
use std::time::Duration;

use crate::backend::process::run_captured;
use crate::backend::{OcrBackend, Transcription};
use crate::core::error::{BenchError, ProviderError};
use crate::core::model::ModelSpec;

const IMAGE_PLACEHOLDER: &str = "{image}";
const PROMPT_PLACEHOLDER: &str = "{prompt}";
const MODEL_PLACEHOLDER: &str = "{model}";

/// Runs an external program per image; its stdout is the transcription.
///
/// Arguments may contain `{image}`, `{prompt}` and `{model}` placeholders.
/// Without an `{image}` placeholder the image path is appended.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    model_id: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(model_id: impl Into<String>, argv: Vec<String>, timeout: Duration) -> Result<Self, BenchError> {
        let model_id = model_id.into();
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| BenchError::config(format!("model '{model_id}' has an empty command")))?;
        Ok(Self {
            model_id,
            program,
            args: argv.collect(),
            timeout,
        })
    }

    pub fn from_spec(spec: &ModelSpec, timeout: Duration) -> Result<Self, BenchError> {
        Self::new(spec.id.clone(), spec.command.clone().unwrap_or_default(), timeout)
    }

    fn render_args(&self, prompt: &str, image: &Path) -> Vec<String> {
        let image = image.to_string_lossy();
        let mut has_image = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                has_image |= arg.contains(IMAGE_PLACEHOLDER);
                arg.replace(IMAGE_PLACEHOLDER, &image)
                    .replace(PROMPT_PLACEHOLDER, prompt)
                    .replace(MODEL_PLACEHOLDER, &self.model_id)
            })
            .collect();
        if !has_image {
            args.push(image.into_owned());
        }
        args
    }
}

impl OcrBackend for CommandBackend {
    fn transcribe(&self, prompt: &str, image: &Path) -> Result<Transcription, ProviderError> {
        let args = self.render_args(prompt, image);
        let content = run_captured(&self.program, &args, self.timeout)?;
        Ok(Transcription { content })
    }
}
