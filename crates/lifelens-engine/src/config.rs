use std::env;
use std::time::Duration;

use crate::http::normalize_api_base;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub vision_model: String,
    pub reasoning_model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HuggingFaceSettings {
    pub api_token: Option<String>,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub decision_ttl: Duration,
    pub description_ttl: Duration,
    pub preference_ttl: Duration,
    pub decision_max_entries: usize,
    pub description_max_entries: usize,
    pub preference_max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            decision_ttl: Duration::from_secs(300),
            description_ttl: Duration::from_secs(24 * 3600),
            preference_ttl: Duration::from_secs(3600),
            decision_max_entries: 512,
            description_max_entries: 2048,
            preference_max_entries: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub openai: OpenAiSettings,
    pub gemini: GeminiSettings,
    pub huggingface: HuggingFaceSettings,
    pub vision_timeout: Duration,
    pub reasoning_timeout: Duration,
    pub decision_budget: Duration,
    pub cache: CacheSettings,
    pub infer_mood: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| first_non_empty(&lookup, keys);
        let seconds = |key: &str, default: u64, min: u64, max: u64| {
            let value = first(&[key])
                .and_then(|raw| raw.parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .map(|value| value.clamp(min as f64, max as f64))
                .unwrap_or(default as f64);
            Duration::from_secs_f64(value)
        };
        let count = |key: &str| {
            first(&[key])
                .and_then(|raw| raw.parse::<usize>().ok())
                .filter(|value| *value > 0)
        };

        // Per-namespace keys win; the shared key scales descriptions x4 and
        // preference snapshots x2.
        let defaults = CacheSettings::default();
        let shared_max = count("LIFELENS_CACHE_MAX_ENTRIES");

        Self {
            openai: OpenAiSettings {
                api_key: first(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
                api_base: normalize_api_base(
                    &first(&["OPENAI_API_BASE", "OPENAI_BASE_URL"])
                        .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                    Some("v1"),
                ),
                vision_model: first(&["LIFELENS_VISION_MODEL"])
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                reasoning_model: first(&["LIFELENS_REASONING_MODEL"])
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            },
            gemini: GeminiSettings {
                api_key: first(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
                api_base: normalize_api_base(
                    &first(&["GEMINI_API_BASE"]).unwrap_or_else(|| {
                        "https://generativelanguage.googleapis.com/v1beta".to_string()
                    }),
                    None,
                ),
                model: first(&["LIFELENS_GEMINI_MODEL"])
                    .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            },
            huggingface: HuggingFaceSettings {
                api_token: first(&["HF_API_TOKEN", "HUGGINGFACE_API_KEY"]),
                api_base: normalize_api_base(
                    &first(&["HF_API_BASE"]).unwrap_or_else(|| {
                        "https://api-inference.huggingface.co/models".to_string()
                    }),
                    None,
                ),
                model: first(&["LIFELENS_HF_MODEL"])
                    .unwrap_or_else(|| "Salesforce/blip-image-captioning-large".to_string()),
            },
            vision_timeout: seconds("LIFELENS_VISION_TIMEOUT_S", 12, 1, 60),
            reasoning_timeout: seconds("LIFELENS_REASONING_TIMEOUT_S", 30, 1, 120),
            decision_budget: seconds("LIFELENS_DECISION_BUDGET_S", 60, 5, 300),
            cache: CacheSettings {
                decision_ttl: seconds(
                    "LIFELENS_DECISION_TTL_S",
                    defaults.decision_ttl.as_secs(),
                    1,
                    24 * 3600,
                ),
                description_ttl: seconds(
                    "LIFELENS_DESCRIPTION_TTL_S",
                    defaults.description_ttl.as_secs(),
                    1,
                    7 * 24 * 3600,
                ),
                preference_ttl: seconds(
                    "LIFELENS_PREFERENCE_TTL_S",
                    defaults.preference_ttl.as_secs(),
                    1,
                    7 * 24 * 3600,
                ),
                decision_max_entries: count("LIFELENS_DECISION_MAX_ENTRIES")
                    .or(shared_max)
                    .unwrap_or(defaults.decision_max_entries),
                description_max_entries: count("LIFELENS_DESCRIPTION_MAX_ENTRIES")
                    .or(shared_max.map(|value| value.saturating_mul(4)))
                    .unwrap_or(defaults.description_max_entries),
                preference_max_entries: count("LIFELENS_PREFERENCE_MAX_ENTRIES")
                    .or(shared_max.map(|value| value.saturating_mul(2)))
                    .unwrap_or(defaults.preference_max_entries),
            },
            infer_mood: first(&["LIFELENS_INFER_MOOD"])
                .map(|raw| parse_bool(&raw).unwrap_or(true))
                .unwrap_or(true),
        }
    }
}

fn first_non_empty<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
