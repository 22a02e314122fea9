use std::time::Duration;

use anyhow::{Context, Result};
use lifelens_contracts::models::{ProviderRole, ProviderSelector};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;

use crate::config::OpenAiSettings;
use crate::error::ProviderError;
use crate::http::{build_client, response_json_or_error};
use crate::vision::openai::extract_openai_output_text;

/// External text-completion model. The returned text is expected, not
/// guaranteed, to be a JSON decision.
pub trait ReasoningProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

pub struct OpenAiReasoningProvider {
    api_key: Option<String>,
    api_base: String,
    model: String,
    http: HttpClient,
}

impl OpenAiReasoningProvider {
    /// Resolves the configured model against the catalog; unknown names fall
    /// back to the catalog default.
    pub fn new(
        settings: &OpenAiSettings,
        selector: &ProviderSelector,
        timeout: Duration,
    ) -> Result<Self> {
        let selection = selector
            .select(Some(settings.reasoning_model.as_str()), ProviderRole::Reasoning)
            .map_err(anyhow::Error::msg)?;
        if let Some(reason) = &selection.fallback_reason {
            tracing::warn!(
                requested = %settings.reasoning_model,
                model = %selection.spec.name,
                reason = %reason,
                "reasoning model replaced"
            );
        }
        let model = selection
            .spec
            .default_model
            .clone()
            .unwrap_or_else(|| selection.spec.name.clone());
        Ok(Self {
            api_key: settings.api_key.clone(),
            api_base: settings.api_base.clone(),
            model,
            http: build_client(timeout)?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, api_key: &str, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/responses", self.api_base);
        let payload = json!({
            "model": self.model,
            "input": [{
                "role": "user",
                "content": [{"type": "input_text", "text": prompt}],
            }],
            "max_output_tokens": 900,
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI reasoning request failed ({endpoint})"))?;
        let parsed = response_json_or_error("OpenAI", response)?;
        Ok(extract_openai_output_text(&parsed))
    }
}

impl ReasoningProvider for OpenAiReasoningProvider {
    fn name(&self) -> &str {
        "openai-reasoning"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::unavailable(self.name(), "OPENAI_API_KEY not set"));
        };
        self.request(api_key, prompt)
            .map_err(|err| ProviderError::transport(self.name(), &err))
    }
}
