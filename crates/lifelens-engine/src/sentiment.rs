use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

pub const MAX_BATCH_TEXTS: usize = 100;
pub const MAX_TEXT_CHARS: usize = 512;
const NEUTRAL_BELOW: f64 = 0.6;

const POSITIVE_WORDS: &[&str] = &[
    "amazing", "awesome", "celebrate", "celebrating", "cheerful", "confident", "energetic",
    "excited", "fantastic", "fun", "glad", "good", "great", "happy", "joy", "love", "lucky",
    "motivated", "perfect", "pumped", "relaxed", "wonderful",
];
const NEGATIVE_WORDS: &[&str] = &[
    "angry", "annoyed", "anxious", "awful", "bad", "bored", "depressed", "down", "exhausted",
    "hate", "lonely", "miserable", "sad", "sick", "stressed", "terrible", "tired", "unhappy",
    "upset", "worried", "worst",
];
const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "don't", "isnt", "isn't", "hardly"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
    pub scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SentimentError {
    #[error("text cannot be empty")]
    EmptyText,
    #[error("no texts provided")]
    EmptyBatch,
    #[error("at most {MAX_BATCH_TEXTS} texts per batch, got {0}")]
    BatchTooLarge(usize),
}

/// Deterministic word-list analyzer. Polarity words preceded by a negation
/// within two words count for the opposite side.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, text: &str) -> Result<Sentiment, SentimentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SentimentError::EmptyText);
        }
        let truncated: String = text.chars().take(MAX_TEXT_CHARS).collect();
        let lowered = truncated.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
            .filter(|word| !word.is_empty())
            .collect();

        let mut positive = 0u32;
        let mut negative = 0u32;
        for (position, word) in words.iter().enumerate() {
            let polarity = if POSITIVE_WORDS.contains(word) {
                1
            } else if NEGATIVE_WORDS.contains(word) {
                -1
            } else {
                continue;
            };
            let negated = words[position.saturating_sub(2)..position]
                .iter()
                .any(|prior| NEGATIONS.contains(prior));
            if (polarity > 0) != negated {
                positive += 1;
            } else {
                negative += 1;
            }
        }

        let hits = f64::from(positive + negative);
        let lean = (f64::from(positive) - f64::from(negative)) / (hits + 1.0);
        let positive_score = 0.5 + 0.5 * lean;
        let (mut label, score) = if positive_score >= 0.5 && positive > negative {
            (SentimentLabel::Positive, positive_score)
        } else {
            (SentimentLabel::Negative, 1.0 - positive_score)
        };
        let mut scores = BTreeMap::from([
            ("positive".to_string(), positive_score),
            ("negative".to_string(), 1.0 - positive_score),
            ("neutral".to_string(), 0.0),
        ]);
        if score < NEUTRAL_BELOW {
            label = SentimentLabel::Neutral;
            scores.insert("neutral".to_string(), 1.0 - score);
        }
        Ok(Sentiment {
            label,
            score,
            scores,
        })
    }

    /// Blank entries yield `None` in their slot.
    pub fn analyze_batch(&self, texts: &[String]) -> Result<Vec<Option<Sentiment>>, SentimentError> {
        if texts.is_empty() {
            return Err(SentimentError::EmptyBatch);
        }
        if texts.len() > MAX_BATCH_TEXTS {
            return Err(SentimentError::BatchTooLarge(texts.len()));
        }
        Ok(texts.iter().map(|text| self.analyze(text).ok()).collect())
    }

    /// Mood word for a free-form text, or `None` when the reading is neutral.
    pub fn infer_mood(&self, text: &str) -> Option<&'static str> {
        match self.analyze(text).ok()?.label {
            SentimentLabel::Positive => Some("happy"),
            SentimentLabel::Negative => Some("down"),
            SentimentLabel::Neutral => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SentimentAnalyzer, SentimentError, SentimentLabel, MAX_BATCH_TEXTS};

    #[test]
    fn clear_polarity_is_labelled() -> anyhow::Result<()> {
        let analyzer = SentimentAnalyzer::new();
        let happy = analyzer.analyze("I'm so excited and happy, what should I wear?")?;
        assert_eq!(happy.label, SentimentLabel::Positive);
        assert!(happy.score >= 0.6);
        let sad = analyzer.analyze("Feeling tired and sad, what should I eat?")?;
        assert_eq!(sad.label, SentimentLabel::Negative);
        Ok(())
    }

    #[test]
    fn weak_or_mixed_signal_is_neutral() -> anyhow::Result<()> {
        let analyzer = SentimentAnalyzer::new();
        let plain = analyzer.analyze("Which hoodie should I wear today?")?;
        assert_eq!(plain.label, SentimentLabel::Neutral);
        assert_eq!(plain.scores.get("neutral"), Some(&0.5));
        let mixed = analyzer.analyze("happy but tired")?;
        assert_eq!(mixed.label, SentimentLabel::Neutral);
        Ok(())
    }

    #[test]
    fn negation_flips_polarity() -> anyhow::Result<()> {
        let analyzer = SentimentAnalyzer::new();
        let reading = analyzer.analyze("I am not happy and not excited")?;
        assert_eq!(reading.label, SentimentLabel::Negative);
        Ok(())
    }

    #[test]
    fn mood_inference_maps_labels() {
        let analyzer = SentimentAnalyzer::new();
        assert_eq!(analyzer.infer_mood("great day, feeling awesome"), Some("happy"));
        assert_eq!(analyzer.infer_mood("awful, stressed week"), Some("down"));
        assert_eq!(analyzer.infer_mood("Pizza or pasta?"), None);
        assert_eq!(analyzer.infer_mood("   "), None);
    }

    #[test]
    fn batch_limits_are_enforced() {
        let analyzer = SentimentAnalyzer::new();
        assert_eq!(analyzer.analyze_batch(&[]), Err(SentimentError::EmptyBatch));
        let many = vec!["fine".to_string(); MAX_BATCH_TEXTS + 1];
        assert_eq!(
            analyzer.analyze_batch(&many),
            Err(SentimentError::BatchTooLarge(MAX_BATCH_TEXTS + 1))
        );
        let readings = analyzer
            .analyze_batch(&["happy".to_string(), String::new()])
            .expect("batch");
        assert!(readings[0].is_some());
        assert!(readings[1].is_none());
    }
}
