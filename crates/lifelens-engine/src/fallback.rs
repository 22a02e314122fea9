use std::collections::BTreeMap;

use lifelens_contracts::{DecisionContext, DecisionResult, ImageInput, RankedOption};

const BOLD_MOODS: [&str; 3] = ["energetic", "happy", "excited"];
const COMFORT_MOODS: [&str; 3] = ["sad", "down", "tired"];

const TOP_SCORE: f64 = 0.8;
const SCORE_STEP: f64 = 0.1;
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Coarse reading of a free-form mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoodBucket {
    Bold,
    Comfort,
    Neutral,
}

impl MoodBucket {
    /// Whole-word match against the bucket vocabularies, so "unhappy" is not
    /// read as happy.
    pub fn classify(mood: Option<&str>) -> Self {
        let Some(mood) = mood else {
            return Self::Neutral;
        };
        let lowered = mood.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect();
        if words.iter().any(|word| COMFORT_MOODS.contains(word)) {
            return Self::Comfort;
        }
        if words.iter().any(|word| BOLD_MOODS.contains(word)) {
            return Self::Bold;
        }
        Self::Neutral
    }

    /// Preferred option index for `option_count` options.
    pub fn preferred_index(self, option_count: usize) -> usize {
        let last = option_count.saturating_sub(1);
        match self {
            Self::Bold => last.min(1),
            Self::Comfort => (option_count / 2).min(last),
            Self::Neutral => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bold => "bold",
            Self::Comfort => "comfort",
            Self::Neutral => "neutral",
        }
    }
}

/// Offline recommender used whenever the remote pipeline cannot produce a
/// decision. Pure and infallible.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRecommender;

impl FallbackRecommender {
    pub fn new() -> Self {
        Self
    }

    pub fn recommend(&self, options: &[ImageInput], context: &DecisionContext) -> DecisionResult {
        let labels: Vec<String> = options.iter().map(|row| row.label.clone()).collect();
        self.recommend_labels(&labels, context)
    }

    pub fn recommend_labels(&self, labels: &[String], context: &DecisionContext) -> DecisionResult {
        let bucket = MoodBucket::classify(context.mood.as_deref());
        let preferred = bucket.preferred_index(labels.len());
        let reason_for = |distance: usize| match (distance, bucket) {
            (0, MoodBucket::Bold) => "Bolder pick to match an upbeat mood".to_string(),
            (0, MoodBucket::Comfort) => "Balanced, easy-going pick for a low-energy mood".to_string(),
            (0, MoodBucket::Neutral) => "First option kept as the default pick".to_string(),
            (1, _) => "Close alternative to the top pick".to_string(),
            _ => "Further from the preferred pick".to_string(),
        };

        let ranked: Vec<RankedOption> = labels
            .iter()
            .enumerate()
            .map(|(index, label)| {
                let distance = index.abs_diff(preferred);
                RankedOption {
                    index,
                    label: label.clone(),
                    score: (TOP_SCORE - SCORE_STEP * distance as f64).max(0.0),
                    reason: reason_for(distance),
                }
            })
            .collect();

        let mut factors = BTreeMap::new();
        factors.insert(
            "mood".to_string(),
            if bucket == MoodBucket::Neutral { 0.0 } else { 1.0 },
        );
        factors.insert(
            "category".to_string(),
            if context.category.is_some() { 0.5 } else { 0.0 },
        );

        let mut result = DecisionResult {
            recommended_index: preferred,
            ranked,
            reasoning: format!(
                "Recommendation made offline from mood ({}) and category alone; no image analysis was available.",
                bucket.as_str()
            ),
            confidence: FALLBACK_CONFIDENCE,
            factors,
            fallback: true,
        };
        result.canonicalize();
        result
    }
}

#[cfg(test)]
mod tests {
    use lifelens_contracts::{Category, DecisionContext, ImageInput, Tier};

    use super::{FallbackRecommender, MoodBucket};

    fn options(count: usize) -> Vec<ImageInput> {
        (0..count)
            .map(|idx| ImageInput::new(vec![idx as u8 + 1], format!("Option {}", idx + 1)))
            .collect()
    }

    fn context(mood: Option<&str>) -> DecisionContext {
        DecisionContext {
            question: "Which one?".to_string(),
            mood: mood.map(str::to_string),
            category: Some(Category::Clothing),
            weather: None,
            user_tier: Tier::Free,
        }
    }

    fn recommended(count: usize, mood: Option<&str>) -> usize {
        FallbackRecommender::new()
            .recommend(&options(count), &context(mood))
            .recommended_index
    }

    #[test]
    fn mood_buckets_pick_fixed_indices() {
        assert_eq!(recommended(3, Some("energetic")), 1);
        assert_eq!(recommended(3, Some("happy")), 1);
        assert_eq!(recommended(3, Some("sad")), 1);
        assert_eq!(recommended(3, Some("tired")), 1);
        assert_eq!(recommended(3, Some("calm")), 0);
        assert_eq!(recommended(3, None), 0);
        assert_eq!(recommended(2, Some("excited")), 1);
        assert_eq!(recommended(2, Some("down")), 1);
    }

    #[test]
    fn scores_decay_with_distance() {
        let result = FallbackRecommender::new().recommend(&options(3), &context(Some("calm")));
        let scores: Vec<(usize, f64)> = result.ranked.iter().map(|row| (row.index, row.score)).collect();
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0], (0, 0.8));
        assert_eq!(scores[1].0, 1);
        assert!((scores[1].1 - 0.7).abs() < 1e-9);
        assert_eq!(scores[2].0, 2);
        assert!((scores[2].1 - 0.6).abs() < 1e-9);
        assert!(result.fallback);
    }

    #[test]
    fn results_satisfy_invariants_for_every_bucket() {
        for count in 2..=3 {
            for mood in [None, Some("happy"), Some("so tired today"), Some("meh")] {
                let result = FallbackRecommender::new().recommend(&options(count), &context(mood));
                assert_eq!(result.check_invariants(count), Ok(()));
            }
        }
    }

    #[test]
    fn classification_uses_whole_words() {
        assert_eq!(MoodBucket::classify(Some("Feeling HAPPY!")), MoodBucket::Bold);
        assert_eq!(MoodBucket::classify(Some("unhappy")), MoodBucket::Neutral);
        assert_eq!(MoodBucket::classify(Some("down but excited")), MoodBucket::Comfort);
        assert_eq!(MoodBucket::classify(Some("")), MoodBucket::Neutral);
    }
}
