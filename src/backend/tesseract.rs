use std::path::Path;
use std::time::Duration;

use crate::backend::process::run_captured;
use crate::backend::{OcrBackend, Transcription};
use crate::core::error::ProviderError;
use crate::core::model::ModelSpec;

const DEFAULT_LANGUAGE: &str = "eng";

/// Local Tesseract install. The prompt is ignored.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    binary: String,
    language: String,
    timeout: Duration,
}

impl TesseractBackend {
    pub fn from_spec(spec: &ModelSpec, timeout: Duration) -> Self {
        Self {
            // `endpoint` doubles as a path to a non-default binary
            binary: spec.endpoint.clone().unwrap_or_else(|| "tesseract".to_string()),
            language: spec
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            timeout,
        }
    }

    fn args(&self, image: &Path) -> Vec<String> {
        vec![
            image.to_string_lossy().into_owned(),
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
            "--psm".to_string(),
            // single text line, the layout of line-level ground truth sets
            "7".to_string(),
        ]
    }
}

impl OcrBackend for TesseractBackend {
    fn transcribe(&self, _prompt: &str, image: &Path) -> Result<Transcription, ProviderError> {
        let content = run_captured(&self.binary, &self.args(image), self.timeout)?;
        Ok(Transcription { content })
    }
}
