use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde_json::json;

use crate::{is_placeholder_value, truncate_for_error};

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
const MAX_ANSWER_TOKENS: u32 = 400;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(String),

    #[error("inference provider rejected the request: {0}")]
    Provider(String),

    #[error("inference provider returned no answer for model `{0}`")]
    EmptyAnswer(String),

    #[error("inference is not configured: {0}")]
    NotConfigured(String),
}

/// Submits an image plus instruction prompt and returns the text answer.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn model_id(&self) -> &str;
    async fn infer(&self, image: &[u8], prompt: &str) -> Result<String, InferenceError>;
}

#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE.to_string(),
            model: "gpt-4o".to_string(),
        }
    }
}

pub struct OpenAIVisionProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl OpenAIVisionProvider {
    pub fn new(config: OpenAIConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        Ok(Self {
            base_url: normalize_base(&config.base_url),
            api_key: config
                .api_key
                .filter(|key| !is_placeholder_value(key)),
            model: config.model,
            client,
        })
    }

    /// Lists models to confirm the key and base URL work.
    pub async fn verify(&self) -> Result<(), InferenceError> {
        let api_key = self.require_key()?;
        let resp = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let value: serde_json::Value = resp.json().await.unwrap_or_default();
        Err(InferenceError::Provider(
            extract_openai_error(&value)
                .unwrap_or_else(|| format!("model listing failed with status {status}")),
        ))
    }

    fn require_key(&self) -> Result<&str, InferenceError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| InferenceError::NotConfigured("OPENAI_API_KEY is missing".to_string()))
    }
}

#[async_trait]
impl InferenceProvider for OpenAIVisionProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn infer(&self, image: &[u8], prompt: &str) -> Result<String, InferenceError> {
        let api_key = self.require_key()?;
        let body = build_vision_request(&self.model, image, prompt);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        let status = response.status();
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            return Err(InferenceError::Provider(detail));
        }

        if let Some(detail) = extract_openai_error(&value) {
            return Err(InferenceError::Provider(detail));
        }

        match extract_openai_text(&value) {
            Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            _ => {
                tracing::debug!(
                    "empty completion body: {}",
                    truncate_for_error(&value.to_string(), 500)
                );
                Err(InferenceError::EmptyAnswer(self.model.clone()))
            }
        }
    }
}

fn image_mime(image: &[u8]) -> &'static str {
    if image.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if image.starts_with(b"RIFF") && image.get(8..12) == Some(b"WEBP".as_slice()) {
        "image/webp"
    } else {
        "image/png"
    }
}

pub(crate) fn build_vision_request(model: &str, image: &[u8], prompt: &str) -> serde_json::Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(image);
    let data_url = format!("data:{};base64,{encoded}", image_mime(image));
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": prompt},
                {"type": "image_url", "image_url": {"url": data_url, "detail": "high"}},
            ],
        }],
        "max_tokens": MAX_ANSWER_TOKENS,
    })
}

fn normalize_base(input: &str) -> String {
    if input.ends_with("/v1") {
        input.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", input.trim_end_matches('/'))
    }
}

fn collect_text_fragments(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => out.push_str(s),
        serde_json::Value::Array(arr) => {
            for item in arr {
                collect_text_fragments(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text_fragments(content, out);
            }
            if let Some(message) = map.get("message") {
                collect_text_fragments(message, out);
            }
        }
        _ => {}
    }
}

fn extract_openai_text(value: &serde_json::Value) -> Option<String> {
    let mut out = String::new();

    if let Some(choice) = value.get("choices").and_then(|v| v.get(0)) {
        collect_text_fragments(choice, &mut out);
        if !out.trim().is_empty() {
            return Some(out);
        }
    }

    if let Some(text) = value.get("output_text").and_then(|v| v.as_str()) {
        return Some(text.to_string());
    }

    None
}

fn extract_openai_error(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
