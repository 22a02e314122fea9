use std::time::Duration;

use anyhow::{Context, Result};
use lifelens_contracts::{Category, ImageInput, SourceProvider, Tier};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::config::GeminiSettings;
use crate::error::ProviderError;
use crate::http::{build_client, response_json_or_error};
use crate::vision::prepare::{prepare_vision_image_base64, VISION_MAX_DIM};
use crate::vision::{description_instruction, VisionProvider};

const NAME: &str = "gemini-vision";

/// Mid-cost describer over Gemini `generateContent`.
pub struct GeminiVisionProvider {
    api_key: Option<String>,
    api_base: String,
    model: String,
    min_tier: Tier,
    http: HttpClient,
}

impl GeminiVisionProvider {
    pub fn new(settings: &GeminiSettings, min_tier: Tier, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: settings.api_key.clone(),
            api_base: settings.api_base.clone(),
            model: settings.model.clone(),
            min_tier,
            http: build_client(timeout)?,
        })
    }

    fn endpoint_for_model(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn request(&self, api_key: &str, payload: &Value) -> Result<String> {
        let endpoint = self.endpoint_for_model();
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let parsed = response_json_or_error("Gemini", response)?;
        Ok(extract_gemini_text(&parsed))
    }
}

impl VisionProvider for GeminiVisionProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn source(&self) -> SourceProvider {
        SourceProvider::GeminiVision
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
            return Err(ProviderError::unavailable(NAME, "GEMINI_API_KEY or GOOGLE_API_KEY not set"));
        };
        let Some((data, mime)) = prepare_vision_image_base64(&image.payload, VISION_MAX_DIM) else {
            return Err(ProviderError::declined(NAME, "payload is not a readable image"));
        };
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"inlineData": {"mimeType": mime, "data": data}},
                    {"text": description_instruction(&image.label, category)},
                ],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "maxOutputTokens": 160,
            },
        });
        self.request(api_key, &payload)
            .map_err(|err| ProviderError::transport(NAME, &err))
    }
}

fn extract_gemini_text(response: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for candidate in candidates.iter().take(1) {
        let rows = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in rows {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lifelens_contracts::Tier;
    use serde_json::json;

    use crate::config::GeminiSettings;
    use crate::vision::VisionProvider;

    use super::{extract_gemini_text, GeminiVisionProvider};

    fn settings(key: Option<&str>, model: &str) -> GeminiSettings {
        GeminiSettings {
            api_key: key.map(str::to_string),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: model.to_string(),
        }
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_models() -> anyhow::Result<()> {
        let bare = GeminiVisionProvider::new(&settings(None, "gemini-2.0-flash"), Tier::Premium, Duration::from_secs(1))?;
        assert_eq!(
            bare.endpoint_for_model(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        let prefixed = GeminiVisionProvider::new(&settings(None, "models/gemini-pro"), Tier::Premium, Duration::from_secs(1))?;
        assert!(prefixed.endpoint_for_model().ends_with("/models/gemini-pro:generateContent"));
        Ok(())
    }

    #[test]
    fn availability_needs_key_and_premium_tier() -> anyhow::Result<()> {
        let provider = GeminiVisionProvider::new(&settings(Some("k"), "gemini-2.0-flash"), Tier::Premium, Duration::from_secs(1))?;
        assert!(!provider.is_available(Tier::Free));
        assert!(provider.is_available(Tier::Premium));
        assert!(provider.is_available(Tier::Unlimited));
        Ok(())
    }

    #[test]
    fn reads_first_candidate_text_parts() {
        let payload = json!({
            "candidates": [
                {"content": {"parts": [{"text": "A bowl of pho"}, {"text": "with herbs"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        });
        assert_eq!(extract_gemini_text(&payload), "A bowl of pho with herbs");
        assert_eq!(extract_gemini_text(&json!({"candidates": []})), "");
    }
}
