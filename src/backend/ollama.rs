use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};

use crate::backend::{encode_image, http_client, parse_json_response, OcrBackend, Transcription};
use crate::core::error::{BenchError, ProviderError};
use crate::core::model::ModelSpec;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Vision model served by a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OllamaBackend {
    pub fn from_spec(spec: &ModelSpec, timeout: Duration) -> Result<Self, BenchError> {
        let endpoint = spec.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        Ok(Self {
            client: http_client(&spec.id, timeout)?,
            url: format!("{}/api/generate", endpoint.trim_end_matches('/')),
            model: spec.id.clone(),
            timeout,
        })
    }

    fn request_body(&self, prompt: &str, image_base64: String) -> Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "images": [image_base64],
            "stream": false,
            "options": { "temperature": 0.0 }
        })
    }
}

impl OcrBackend for OllamaBackend {
    fn transcribe(&self, prompt: &str, image: &Path) -> Result<Transcription, ProviderError> {
        let (_, data) = encode_image(image)?;
        let body = self.request_body(prompt, data);
        let value = parse_json_response(self.client.post(&self.url).json(&body).send(), self.timeout)?;
        extract_response(&value).map(|content| Transcription { content })
    }
}

fn extract_response(value: &Value) -> Result<String, ProviderError> {
    value["response"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Malformed(format!("no 'response' field in {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ProviderKind;

    #[test]
    fn builds_generate_request() -> Result<(), BenchError> {
        let mut spec = ModelSpec::new("llama3.2-vision", ProviderKind::Ollama);
        spec.endpoint = Some("http://gpu-box:11434/".to_string());
        let backend = OllamaBackend::from_spec(&spec, Duration::from_secs(5))?;
        assert_eq!(backend.url, "http://gpu-box:11434/api/generate");

        let body = backend.request_body("read", "AAAA".to_string());
        assert_eq!(body["model"], "llama3.2-vision");
        assert_eq!(body["images"][0], "AAAA");
        assert_eq!(body["stream"], false);
        Ok(())
    }

    #[test]
    fn extracts_response_text() {
        let ok = json!({ "model": "m", "response": "Ein Text", "done": true });
        assert_eq!(extract_response(&ok).unwrap(), "Ein Text");
        let bad = json!({ "error": "model not found" });
        assert!(matches!(extract_response(&bad), Err(ProviderError::Malformed(_))));
    }
}
