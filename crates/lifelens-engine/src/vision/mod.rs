mod gemini;
mod heuristic;
mod huggingface;
pub(crate) mod openai;
pub(crate) mod prepare;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use lifelens_contracts::models::ProviderCatalog;
use lifelens_contracts::{Category, ImageDescriptor, ImageInput, SourceProvider, Tier};

use crate::cache::{description_key, ResponseCache};
use crate::config::EngineConfig;
use crate::error::ProviderError;
use crate::guard::{run_with_timeout, CancelToken};
use crate::text::clean_description;

pub use gemini::GeminiVisionProvider;
pub use heuristic::HeuristicAnalyzer;
pub use huggingface::HuggingFaceVisionProvider;
pub use openai::OpenAiVisionProvider;

pub(crate) const MAX_DESCRIPTION_CHARS: usize = 300;

/// One image-description strategy. Providers differ only in latency, cost and
/// the availability predicate.
pub trait VisionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn source(&self) -> SourceProvider;
    /// Credentials present and the tier unlocks this provider.
    fn is_available(&self, tier: Tier) -> bool;
    fn describe(
        &self,
        image: &ImageInput,
        category: Option<Category>,
    ) -> Result<String, ProviderError>;
}

/// Ordered first-success-wins driver over [`VisionProvider`]s.
pub struct ProviderWaterfall {
    providers: Vec<Arc<dyn VisionProvider>>,
    timeout: Duration,
    cache: Option<Arc<ResponseCache>>,
}

impl ProviderWaterfall {
    pub fn new(providers: Vec<Arc<dyn VisionProvider>>, timeout: Duration) -> Self {
        Self {
            providers,
            timeout,
            cache: None,
        }
    }

    /// Builds the adapters named by the catalog, in its vision order.
    pub fn from_config(config: &EngineConfig, catalog: &ProviderCatalog) -> Result<Self> {
        let mut providers: Vec<Arc<dyn VisionProvider>> = Vec::new();
        for spec in catalog.vision_order() {
            let provider: Arc<dyn VisionProvider> = match spec.name.as_str() {
                "openai-vision" => Arc::new(OpenAiVisionProvider::new(
                    &config.openai,
                    spec.min_tier,
                    config.vision_timeout,
                )?),
                "gemini-vision" => Arc::new(GeminiVisionProvider::new(
                    &config.gemini,
                    spec.min_tier,
                    config.vision_timeout,
                )?),
                "huggingface-vision" => Arc::new(HuggingFaceVisionProvider::new(
                    &config.huggingface,
                    spec.min_tier,
                    config.vision_timeout,
                )?),
                "heuristic" => Arc::new(HeuristicAnalyzer::new()),
                other => {
                    tracing::warn!(provider = other, "no adapter for catalog vision provider");
                    continue;
                }
            };
            providers.push(provider);
        }
        Ok(Self::new(providers, config.vision_timeout))
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    /// Never fails: on total failure the descriptor carries `success=false`
    /// and a category-appropriate description.
    pub fn describe(
        &self,
        image: &ImageInput,
        category: Option<Category>,
        tier: Tier,
        cancel: &CancelToken,
    ) -> ImageDescriptor {
        if image.is_text_option() {
            return ImageDescriptor::described(
                image.label.clone(),
                text_option_description(image),
                SourceProvider::UserText,
            );
        }

        let cache_key = description_key(image, category, tier);
        if let Some(hit) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get_description(&cache_key))
        {
            tracing::debug!(label = %image.label, cache_key = %cache_key, "description cache hit");
            return hit;
        }

        for provider in &self.providers {
            if cancel.is_cancelled() {
                break;
            }
            let name = provider.name().to_string();
            if !provider.is_available(tier) {
                tracing::debug!(provider = %name, tier = %tier, "vision provider unavailable");
                continue;
            }

            let started = Instant::now();
            let worker = Arc::clone(provider);
            let input = image.clone();
            let outcome = run_with_timeout(&name, self.timeout, cancel, move || {
                worker.describe(&input, category)
            })
            .and_then(|text| {
                let cleaned = clean_description(&text, MAX_DESCRIPTION_CHARS);
                if cleaned.is_empty() {
                    return Err(ProviderError::declined(&name, "empty description"));
                }
                Ok(cleaned)
            });
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(description) => {
                    tracing::info!(provider = %name, label = %image.label, elapsed_ms, "image described");
                    let descriptor = ImageDescriptor::described(
                        image.label.clone(),
                        description,
                        provider.source(),
                    );
                    if provider.source().is_remote() {
                        if let Some(cache) = &self.cache {
                            cache.set_description(&cache_key, &descriptor);
                        }
                    }
                    return descriptor;
                }
                Err(err) => {
                    tracing::debug!(provider = %name, elapsed_ms, error = %err, "vision provider declined");
                }
            }
        }

        tracing::warn!(label = %image.label, "every vision provider failed; using generic description");
        ImageDescriptor::failed(image.label.clone(), fallback_description(&image.label, category))
    }

    /// Describes every option concurrently, one worker per option; results
    /// keep input order.
    pub fn describe_all(
        &self,
        images: &[ImageInput],
        category: Option<Category>,
        tier: Tier,
        cancel: &CancelToken,
    ) -> Vec<ImageDescriptor> {
        thread::scope(|scope| {
            let handles: Vec<_> = images
                .iter()
                .map(|image| scope.spawn(move || self.describe(image, category, tier, cancel)))
                .collect();
            handles
                .into_iter()
                .zip(images)
                .map(|(handle, image)| {
                    handle.join().unwrap_or_else(|_| {
                        ImageDescriptor::failed(
                            image.label.clone(),
                            fallback_description(&image.label, category),
                        )
                    })
                })
                .collect()
        })
    }
}

fn text_option_description(option: &ImageInput) -> String {
    match option.caption.as_deref() {
        Some(caption) => format!("Text option: {} ({})", option.label, caption.trim()),
        None => format!("Text option: {}", option.label),
    }
}

/// Generic stand-in used when no provider produced a description.
pub fn fallback_description(label: &str, category: Option<Category>) -> String {
    let label = label.trim();
    let subject = if label.is_empty() { "this option" } else { label };
    match category {
        Some(Category::Food) => format!("A food or drink choice: {subject}"),
        Some(Category::Clothing) => format!("A clothing item or outfit: {subject}"),
        Some(Category::Activity) => format!("An activity or outing: {subject}"),
        Some(Category::Work) => format!("A work-related option: {subject}"),
        Some(Category::Social) => format!("A social plan or gathering: {subject}"),
        Some(Category::Other) | None => format!("A photo of an option: {subject}"),
    }
}

/// Category hint sent with every remote describe call.
pub(crate) fn description_instruction(label: &str, category: Option<Category>) -> String {
    let focus = match category {
        Some(Category::Food) => {
            "Focus on the dish or drink itself: ingredients, portion, preparation, freshness."
        }
        Some(Category::Clothing) => {
            "Focus on the garment itself: type, color, material, fit, style. Ignore mannequins, hangers, shelves, store displays and backgrounds."
        }
        Some(Category::Activity) => {
            "Focus on the activity or place: setting, indoor/outdoor, energy level, equipment."
        }
        Some(Category::Work) => "Focus on the task, tool or workspace shown and its state.",
        Some(Category::Social) => "Focus on the venue, group size and atmosphere.",
        Some(Category::Other) | None => "Focus on the main subject and its most distinctive traits.",
    };
    format!(
        "Describe the main subject of this photo in one concise sentence (<= {MAX_DESCRIPTION_CHARS} characters). \
The user labeled it \"{label}\"; treat that label as the subject's identity. {focus} \
No hedging, no questions, no commentary. Output only the description."
    )
}
