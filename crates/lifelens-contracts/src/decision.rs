use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Food,
    Clothing,
    Activity,
    Work,
    Social,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Food,
        Self::Clothing,
        Self::Activity,
        Self::Work,
        Self::Social,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::Clothing => "clothing",
            Self::Activity => "activity",
            Self::Work => "work",
            Self::Social => "social",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown category '{}'", raw.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub description: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Immutable per-request context assembled from validated request fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionContext {
    pub question: String,
    pub mood: Option<String>,
    pub category: Option<Category>,
    pub weather: Option<Weather>,
    pub user_tier: Tier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOption {
    pub index: usize,
    pub label: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    pub recommended_index: usize,
    pub ranked: Vec<RankedOption>,
    pub reasoning: String,
    pub confidence: f64,
    pub factors: BTreeMap<String, f64>,
    pub fallback: bool,
}

impl DecisionResult {
    /// Puts `ranked` into canonical order (score descending, index ascending on
    /// ties) and re-points `recommended_index` at the head.
    pub fn canonicalize(&mut self) {
        self.ranked.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.index.cmp(&right.index))
        });
        if let Some(first) = self.ranked.first() {
            self.recommended_index = first.index;
        }
    }

    pub fn recommended(&self) -> Option<&RankedOption> {
        self.ranked.first()
    }

    /// Checks the structural contract for a decision over `option_count` inputs.
    pub fn check_invariants(&self, option_count: usize) -> Result<(), String> {
        if self.ranked.len() != option_count {
            return Err(format!(
                "expected {option_count} ranked options, found {}",
                self.ranked.len()
            ));
        }
        let mut seen = HashSet::new();
        for option in &self.ranked {
            if option.index >= option_count {
                return Err(format!("index {} out of range", option.index));
            }
            if !seen.insert(option.index) {
                return Err(format!("duplicate index {}", option.index));
            }
            if !(0.0..=1.0).contains(&option.score) {
                return Err(format!(
                    "score {} for index {} outside [0,1]",
                    option.score, option.index
                ));
            }
        }
        if self
            .ranked
            .windows(2)
            .any(|pair| pair[0].score < pair[1].score)
        {
            return Err("ranked options are not sorted by score".to_string());
        }
        match self.ranked.first() {
            Some(first) if first.index == self.recommended_index => {}
            _ => return Err("recommended index does not head the ranking".to_string()),
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0,1]", self.confidence));
        }
        Ok(())
    }
}

/// Trimmed, lowercased mood or `None` when blank.
pub fn normalize_mood(raw: Option<&str>) -> Option<String> {
    raw.map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{normalize_mood, Category, DecisionResult, RankedOption};

    fn option(index: usize, score: f64) -> RankedOption {
        RankedOption {
            index,
            label: format!("Option {}", index + 1),
            score,
            reason: "because".to_string(),
        }
    }

    #[test]
    fn canonicalize_sorts_and_repoints_recommendation() {
        let mut result = DecisionResult {
            recommended_index: 0,
            ranked: vec![option(0, 0.2), option(1, 0.9), option(2, 0.9)],
            reasoning: String::new(),
            confidence: 0.7,
            factors: BTreeMap::new(),
            fallback: false,
        };
        result.canonicalize();
        let order: Vec<usize> = result.ranked.iter().map(|row| row.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(result.recommended_index, 1);
        assert_eq!(result.check_invariants(3), Ok(()));
    }

    #[test]
    fn invariants_reject_gaps_and_duplicates() {
        let result = DecisionResult {
            recommended_index: 0,
            ranked: vec![option(0, 0.8), option(0, 0.5)],
            reasoning: String::new(),
            confidence: 0.5,
            factors: BTreeMap::new(),
            fallback: false,
        };
        assert!(result.check_invariants(2).is_err());
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("Clothing".parse::<Category>(), Ok(Category::Clothing));
        assert!("furniture".parse::<Category>().is_err());
    }

    #[test]
    fn mood_normalization_drops_blank_values() {
        assert_eq!(normalize_mood(Some("  Happy ")), Some("happy".to_string()));
        assert_eq!(normalize_mood(Some("   ")), None);
        assert_eq!(normalize_mood(None), None);
    }
}
