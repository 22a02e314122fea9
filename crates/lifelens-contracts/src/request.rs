use serde::Serialize;
use thiserror::Error;

use crate::decision::{normalize_mood, Category, DecisionContext, Weather};
use crate::image::ImageInput;
use crate::tier::{Tier, UsageKind};

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 3;
pub const QUESTION_MIN_CHARS: usize = 5;
pub const QUESTION_MAX_CHARS: usize = 500;
pub const LABEL_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("question must be {min}-{max} characters, got {got}")]
    Question { min: usize, max: usize, got: usize },
    #[error("at least {min} options are required, got {got}")]
    TooFewOptions { min: usize, got: usize },
    #[error("at most {max} options are allowed, got {got}")]
    TooManyOptions { max: usize, got: usize },
    #[error("{labels} labels supplied for {options} options")]
    LabelCount { labels: usize, options: usize },
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("options must be all photos or all text")]
    MixedOptions,
    #[error("text option {0} has an empty label")]
    EmptyTextOption(usize),
    #[error("weather {0}")]
    Weather(String),
}

/// Inbound decision request as the routing layer hands it over.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecisionRequest {
    pub question: String,
    pub mood: Option<String>,
    pub category: Option<String>,
    pub images: Vec<ImageInput>,
    pub labels: Vec<String>,
    pub weather: Option<Weather>,
}

/// A request that passed validation; labels are resolved onto the options.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedRequest {
    pub question: String,
    pub mood: Option<String>,
    pub category: Option<Category>,
    pub weather: Option<Weather>,
    pub options: Vec<ImageInput>,
    pub kind: UsageKind,
}

impl DecisionRequest {
    pub fn validate(&self) -> Result<ValidatedRequest, ValidationError> {
        let question = self.question.trim();
        let question_chars = question.chars().count();
        if !(QUESTION_MIN_CHARS..=QUESTION_MAX_CHARS).contains(&question_chars) {
            return Err(ValidationError::Question {
                min: QUESTION_MIN_CHARS,
                max: QUESTION_MAX_CHARS,
                got: question_chars,
            });
        }

        let count = self.images.len();
        if count < MIN_OPTIONS {
            return Err(ValidationError::TooFewOptions {
                min: MIN_OPTIONS,
                got: count,
            });
        }
        if count > MAX_OPTIONS {
            return Err(ValidationError::TooManyOptions {
                max: MAX_OPTIONS,
                got: count,
            });
        }
        if self.labels.len() > count {
            return Err(ValidationError::LabelCount {
                labels: self.labels.len(),
                options: count,
            });
        }

        let text_options = self.images.iter().filter(|row| row.is_text_option()).count();
        if text_options != 0 && text_options != count {
            return Err(ValidationError::MixedOptions);
        }
        let kind = if text_options == count {
            UsageKind::TextDecision
        } else {
            UsageKind::Decision
        };

        let category = match self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(raw) => Some(
                raw.parse::<Category>()
                    .map_err(|_| ValidationError::UnknownCategory(raw.to_string()))?,
            ),
            None => None,
        };

        if let Some(weather) = &self.weather {
            if let Some(humidity) = weather.humidity {
                if !(0.0..=100.0).contains(&humidity) {
                    return Err(ValidationError::Weather(format!(
                        "humidity {humidity} outside 0-100"
                    )));
                }
            }
            if weather.temperature.is_some_and(|value| !value.is_finite()) {
                return Err(ValidationError::Weather(
                    "temperature is not a number".to_string(),
                ));
            }
        }

        let mut options = Vec::with_capacity(count);
        for (idx, image) in self.images.iter().enumerate() {
            let mut option = image.clone();
            let supplied = self
                .labels
                .get(idx)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .unwrap_or(image.label.trim());
            if supplied.is_empty() && option.is_text_option() {
                return Err(ValidationError::EmptyTextOption(idx));
            }
            option.label = if supplied.is_empty() {
                format!("Option {}", idx + 1)
            } else {
                supplied.chars().take(LABEL_MAX_CHARS).collect()
            };
            options.push(option);
        }

        Ok(ValidatedRequest {
            question: question.to_string(),
            mood: normalize_mood(self.mood.as_deref()),
            category,
            weather: self.weather.clone(),
            options,
            kind,
        })
    }
}

impl ValidatedRequest {
    pub fn context(&self, user_tier: Tier) -> DecisionContext {
        DecisionContext {
            question: self.question.clone(),
            mood: self.mood.clone(),
            category: self.category,
            weather: self.weather.clone(),
            user_tier,
        }
    }
}
