//! Model backends: one implementation per provider behind [`OcrBackend`].

pub mod command;
pub mod ollama;
pub mod openai;
pub mod process;
pub mod tesseract;

use std::path::Path;
use std::time::Duration;

use base64::{prelude::BASE64_STANDARD, Engine};
use reqwest::blocking::{Client, Response};
use serde_json::Value;
use tracing::debug;

use crate::config::Credentials;
use crate::core::error::{BenchError, ProviderError};
use crate::core::model::{ModelSpec, ProviderKind};

pub use command::CommandBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use tesseract::TesseractBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub content: String,
}

/// Turns an image into text. Calls are blocking and may be slow; the
/// orchestrator runs them on worker threads.
pub trait OcrBackend: Send + Sync {
    fn transcribe(&self, prompt: &str, image: &Path) -> Result<Transcription, ProviderError>;
}

/// Builds the backend for a model once per run.
pub trait BackendFactory {
    fn build(&self, model: &ModelSpec) -> Result<Box<dyn OcrBackend>, BenchError>;
}

/// Factory for the built-in providers.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    credentials: Credentials,
    timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(credentials: Credentials, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
        }
    }
}

impl BackendFactory for ProviderRegistry {
    fn build(&self, model: &ModelSpec) -> Result<Box<dyn OcrBackend>, BenchError> {
        debug!(model = %model.id, provider = %model.provider, "building backend");
        let backend: Box<dyn OcrBackend> = match model.provider {
            ProviderKind::Command => Box::new(CommandBackend::from_spec(model, self.timeout)?),
            ProviderKind::Tesseract => Box::new(TesseractBackend::from_spec(model, self.timeout)),
            ProviderKind::Ollama => Box::new(OllamaBackend::from_spec(model, self.timeout)?),
            ProviderKind::Openai => Box::new(OpenAiBackend::from_spec(
                model,
                &self.credentials,
                self.timeout,
            )?),
        };
        Ok(backend)
    }
}

pub(crate) fn http_client(model_id: &str, timeout: Duration) -> Result<Client, BenchError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BenchError::Provider {
            model: model_id.to_string(),
            source: ProviderError::Request(e.to_string()),
        })
}

/// Reads an image and returns its MIME type with the base64 payload.
pub(crate) fn encode_image(image: &Path) -> Result<(&'static str, String), ProviderError> {
    let bytes = std::fs::read(image)?;
    let mime = match image
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "image/png",
    };
    Ok((mime, BASE64_STANDARD.encode(bytes)))
}

pub(crate) fn parse_json_response(
    response: reqwest::Result<Response>,
    timeout: Duration,
) -> Result<Value, ProviderError> {
    let response = response.map_err(|e| request_error(e, timeout))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Value>()
        .map_err(|e| ProviderError::Malformed(e.to_string()))
}

fn request_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Request(err.to_string())
    }
}
