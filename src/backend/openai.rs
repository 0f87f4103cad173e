use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};

use crate::backend::{encode_image, http_client, parse_json_response, OcrBackend, Transcription};
use crate::config::Credentials;
use crate::core::error::{BenchError, ProviderError};
use crate::core::model::ModelSpec;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completion endpoint with image input.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    pub fn from_spec(
        spec: &ModelSpec,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, BenchError> {
        let api_key = credentials.get(&spec.id).ok_or_else(|| {
            BenchError::config(format!(
                "model '{}' requires an API key in ${}",
                spec.id,
                spec.api_key_env.as_deref().unwrap_or("<api_key_env not set>")
            ))
        })?;
        let endpoint = spec.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        Ok(Self {
            client: http_client(&spec.id, timeout)?,
            url: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
            model: spec.id.clone(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    fn request_body(&self, prompt: &str, mime: &str, image_base64: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": format!("data:{mime};base64,{image_base64}") } }
                ]
            }]
        })
    }
}

impl OcrBackend for OpenAiBackend {
    fn transcribe(&self, prompt: &str, image: &Path) -> Result<Transcription, ProviderError> {
        let (mime, data) = encode_image(image)?;
        let body = self.request_body(prompt, mime, &data);
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let value = parse_json_response(response, self.timeout)?;
        extract_content(&value).map(|content| Transcription { content })
    }
}

fn extract_content(value: &Value) -> Result<String, ProviderError> {
    value["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Malformed(format!("no message content in {value}")))
}
