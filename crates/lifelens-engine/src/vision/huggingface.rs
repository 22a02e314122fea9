use std::time::Duration;

use anyhow::{bail, Context, Result};
use lifelens_contracts::{Category, ImageInput, SourceProvider, Tier};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::config::HuggingFaceSettings;
use crate::error::ProviderError;
use crate::http::{build_client, response_json_or_error};
use crate::vision::prepare::{prepare_vision_image, VISION_MAX_DIM};
use crate::vision::VisionProvider;

const NAME: &str = "huggingface-vision";

/// Free-tier captioning over the Hugging Face inference API. The caption is
/// combined with the user label since the model never sees it.
pub struct HuggingFaceVisionProvider {
    api_token: Option<String>,
    api_base: String,
    model: String,
    min_tier: Tier,
    http: HttpClient,
}

impl HuggingFaceVisionProvider {
    pub fn new(settings: &HuggingFaceSettings, min_tier: Tier, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_token: settings.api_token.clone(),
            api_base: settings.api_base.clone(),
            model: settings.model.clone(),
            min_tier,
            http: build_client(timeout)?,
        })
    }

    fn request(&self, token: &str, bytes: Vec<u8>, mime: &str) -> Result<String> {
        let endpoint = format!("{}/{}", self.api_base, self.model.trim_matches('/'));
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(token)
            .header(CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .with_context(|| format!("Hugging Face request failed ({endpoint})"))?;
        let parsed = response_json_or_error("Hugging Face", response)?;
        if let Some(error) = parsed.get("error").and_then(Value::as_str) {
            bail!("Hugging Face model error: {error}");
        }
        Ok(extract_generated_text(&parsed))
    }
}

impl VisionProvider for HuggingFaceVisionProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn source(&self) -> SourceProvider {
        SourceProvider::HuggingfaceVision
    }

    fn is_available(&self, tier: Tier) -> bool {
        self.api_token.is_some() && tier >= self.min_tier
    }

    fn describe(
        &self,
        image: &ImageInput,
        _category: Option<Category>,
    ) -> Result<String, ProviderError> {
        let Some(token) = self.api_token.as_deref() else {
            return Err(ProviderError::unavailable(NAME, "HF_API_TOKEN not set"));
        };
        let Some((bytes, mime)) = prepare_vision_image(&image.payload, VISION_MAX_DIM) else {
            return Err(ProviderError::declined(NAME, "payload is not a readable image"));
        };
        let caption = self
            .request(token, bytes, &mime)
            .map_err(|err| ProviderError::transport(NAME, &err))?;
        let caption = caption.trim();
        if caption.is_empty() {
            return Err(ProviderError::declined(NAME, "empty caption"));
        }
        Ok(format!("{}: {caption}", image.label.trim()))
    }
}

/// Captioning models answer `[{"generated_text": "..."}]`; some deployments
/// drop the array.
fn extract_generated_text(response: &Value) -> String {
    let row = match response {
        Value::Array(rows) => rows.first(),
        other => Some(other),
    };
    row.and_then(|row| row.get("generated_text"))
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}
