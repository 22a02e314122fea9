use std::time::Duration;

use anyhow::{Context, Result};
use lifelens_contracts::{Category, ImageInput, SourceProvider, Tier};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::OpenAiSettings;
use crate::error::ProviderError;
use crate::http::{build_client, response_json_or_error};
use crate::vision::prepare::{prepare_vision_image_data_url, VISION_MAX_DIM};
use crate::vision::{description_instruction, VisionProvider};

const NAME: &str = "openai-vision";

/// Premium describer over the OpenAI Responses API.
pub struct OpenAiVisionProvider {
    api_key: Option<String>,
    api_base: String,
    model: String,
    min_tier: Tier,
    http: HttpClient,
}

impl OpenAiVisionProvider {
    pub fn new(settings: &OpenAiSettings, min_tier: Tier, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: settings.api_key.clone(),
            api_base: settings.api_base.clone(),
            model: settings.vision_model.clone(),
            min_tier,
            http: build_client(timeout)?,
        })
    }

    fn request(&self, api_key: &str, content: Vec<Value>) -> Result<String> {
        let endpoint = format!("{}/responses", self.api_base);
        let payload = json!({
            "model": self.model,
            "input": [{
                "role": "user",
                "content": content,
            }],
            "max_output_tokens": 160,
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI vision request failed ({endpoint})"))?;
        let parsed = response_json_or_error("OpenAI", response)?;
        Ok(extract_openai_output_text(&parsed))
    }
}

impl VisionProvider for OpenAiVisionProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn source(&self) -> SourceProvider {
        SourceProvider::OpenaiVision
    }

    fn is_available(&self, tier: Tier) -> bool {
        self.api_key.is_some() && tier >= self.min_tier
    }

    fn describe(
        &self,
        image: &ImageInput,
        category: Option<Category>,
    ) -> Result<String, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::unavailable(NAME, "OPENAI_API_KEY not set"));
        };
        let Some(data_url) = prepare_vision_image_data_url(&image.payload, VISION_MAX_DIM) else {
            return Err(ProviderError::declined(NAME, "payload is not a readable image"));
        };
        let content = vec![
            json!({"type": "input_text", "text": description_instruction(&image.label, category)}),
            json!({"type": "input_image", "image_url": data_url}),
        ];
        self.request(api_key, content)
            .map_err(|err| ProviderError::transport(NAME, &err))
    }
}

/// Collects text from a Responses API payload: `output_text` when present,
/// else every `output_text`/`text` chunk in `output[]`.
pub(crate) fn extract_openai_output_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let rows = response
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        if let Some(kind) = obj.get("type").and_then(Value::as_str) {
            if matches!(kind, "output_text" | "text") {
                if let Some(text) = obj.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        parts.push(text.trim().to_string());
                    }
                }
                continue;
            }
            if kind != "message" {
                continue;
            }
        }
        let content = obj
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for chunk in content {
            let kind = chunk.get("type").and_then(Value::as_str).unwrap_or_default();
            if !matches!(kind, "output_text" | "text") {
                continue;
            }
            if let Some(text) = chunk.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
        }
    }

    parts.join("\n").trim().to_string()
}
