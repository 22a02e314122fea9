use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lifelens_contracts::{DecisionResult, RankedOption};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ReasoningError, ResponseParseError};
use crate::guard::{run_with_timeout, CancelToken};
use crate::reasoning::ReasoningProvider;
use crate::text::extract_json_object_from_text;

pub const DEFAULT_SCORE: f64 = 0.5;
pub const DEFAULT_CONFIDENCE: f64 = 0.75;
const GENERIC_REASONING: &str =
    "Options were ranked by how well they fit the question, mood and context.";
const GENERIC_REASON: &str = "No specific reason was given for this option.";
const UNRANKED_REASON: &str = "Not ranked by the assistant; given a neutral score.";

/// A repaired decision plus notes on what had to be fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDecision {
    pub result: DecisionResult,
    pub repairs: Vec<String>,
    /// False when the output held no JSON object and the result was built
    /// entirely from defaults.
    pub structured: bool,
}

/// Exact shape requested in the prompt. Output that parses into this and
/// already satisfies the decision contract is taken as is; anything else goes
/// through field-by-field repair.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StrictDecision {
    recommended_index: usize,
    ranked: Vec<StrictRankedOption>,
    reasoning: String,
    confidence: f64,
    factors: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct StrictRankedOption {
    index: usize,
    label: String,
    score: f64,
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LooseDecision {
    #[serde(alias = "recommendedIndex", alias = "recommended_index")]
    recommended: Value,
    #[serde(alias = "rankings", alias = "options")]
    ranked: Value,
    #[serde(alias = "explanation")]
    reasoning: Value,
    confidence: Value,
    factors: Value,
}

/// Turns reasoning-provider text into a canonical [`DecisionResult`] over
/// `labels.len()` options. Every structural defect is repaired; only an empty
/// option list is an error.
pub fn repair_decision(
    raw: &str,
    labels: &[String],
) -> Result<EngineDecision, ResponseParseError> {
    let count = labels.len();
    if count == 0 {
        return Err(ResponseParseError("no options to rank".to_string()));
    }

    let mut repairs = Vec::new();
    let object = extract_json_object_from_text(raw);
    let structured = object.is_some();
    let object = object.unwrap_or_else(|| {
        repairs.push("no JSON object in reasoning output".to_string());
        Map::new()
    });
    if structured {
        match serde_json::from_value::<StrictDecision>(Value::Object(object.clone())) {
            Ok(strict) => {
                if let Some(result) = accept_strict(strict, labels) {
                    return Ok(EngineDecision {
                        result,
                        repairs,
                        structured,
                    });
                }
                repairs.push("strict parse broke the decision contract".to_string());
            }
            Err(err) => repairs.push(format!("strict parse failed: {err}")),
        }
    }
    let loose: LooseDecision =
        serde_json::from_value(Value::Object(object)).unwrap_or_default();

    // Superseded by the head of the ranking below; only checked for shape.
    if as_index(&loose.recommended).is_none() {
        repairs.push("recommendedIndex missing or not a number; defaulted to 0".to_string());
    }

    let reasoning = match loose.reasoning.as_str().map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => {
            repairs.push("reasoning missing; substituted generic text".to_string());
            GENERIC_REASONING.to_string()
        }
    };

    let ranked = repair_ranked(&loose.ranked, labels, &mut repairs);

    let confidence = match as_number(&loose.confidence) {
        Some(value) => {
            if !(0.0..=1.0).contains(&value) {
                repairs.push(format!("confidence {value} clamped"));
            }
            value.clamp(0.0, 1.0)
        }
        None => {
            repairs.push("confidence missing; defaulted".to_string());
            DEFAULT_CONFIDENCE
        }
    };

    let factors = repair_factors(&loose.factors, &mut repairs);

    let mut result = DecisionResult {
        recommended_index: 0,
        ranked,
        reasoning,
        confidence,
        factors,
        fallback: false,
    };
    result.canonicalize();

    Ok(EngineDecision {
        result,
        repairs,
        structured,
    })
}

/// `None` when the parsed shape still violates the contract: wrong option
/// count, out-of-range numbers or blank text.
fn accept_strict(strict: StrictDecision, labels: &[String]) -> Option<DecisionResult> {
    let count = labels.len();
    let unit = 0.0..=1.0;
    if strict.ranked.len() != count
        || strict.reasoning.trim().is_empty()
        || strict.factors.is_empty()
        || strict.factors.values().any(|weight| !unit.contains(weight))
    {
        return None;
    }
    let ranked = strict
        .ranked
        .into_iter()
        .map(|row| {
            (row.index < count && !row.reason.trim().is_empty()).then(|| RankedOption {
                index: row.index,
                label: labels[row.index].clone(),
                score: row.score,
                reason: row.reason.trim().to_string(),
            })
        })
        .collect::<Option<Vec<_>>>()?;
    let mut result = DecisionResult {
        recommended_index: strict.recommended_index,
        ranked,
        reasoning: strict.reasoning.trim().to_string(),
        confidence: strict.confidence,
        factors: strict.factors,
        fallback: false,
    };
    result.canonicalize();
    result.check_invariants(count).ok()?;
    Some(result)
}

fn repair_ranked(raw: &Value, labels: &[String], repairs: &mut Vec<String>) -> Vec<RankedOption> {
    let count = labels.len();
    let mut seen = HashSet::new();
    let mut ranked = Vec::with_capacity(count);

    match raw {
        Value::Array(rows) => {
            for (position, row) in rows.iter().enumerate() {
                let Some(entry) = row.as_object() else {
                    repairs.push(format!("ranked[{position}] is not an object; dropped"));
                    continue;
                };
                let index = entry
                    .get("index")
                    .and_then(as_index)
                    .or_else(|| index_for_label(entry.get("label"), labels));
                let Some(index) = index.filter(|index| *index < count) else {
                    repairs.push(format!("ranked[{position}] has no valid index; dropped"));
                    continue;
                };
                if !seen.insert(index) {
                    repairs.push(format!("duplicate ranked index {index}; dropped"));
                    continue;
                }
                let score = match entry.get("score").and_then(as_number) {
                    Some(score) => {
                        if !(0.0..=1.0).contains(&score) {
                            repairs.push(format!("score {score} for index {index} clamped"));
                        }
                        score.clamp(0.0, 1.0)
                    }
                    None => {
                        repairs.push(format!("score missing for index {index}; defaulted"));
                        DEFAULT_SCORE
                    }
                };
                let reason = match entry.get("reason").and_then(Value::as_str).map(str::trim) {
                    Some(text) if !text.is_empty() => text.to_string(),
                    _ => {
                        repairs.push(format!("reason missing for index {index}"));
                        GENERIC_REASON.to_string()
                    }
                };
                ranked.push(RankedOption {
                    index,
                    label: labels[index].clone(),
                    score,
                    reason,
                });
            }
        }
        Value::Null => repairs.push("ranked missing; synthesized".to_string()),
        _ => repairs.push("ranked is not an array; synthesized".to_string()),
    }

    for (index, label) in labels.iter().enumerate() {
        if seen.contains(&index) {
            continue;
        }
        repairs.push(format!("index {index} missing from ranked; inserted"));
        ranked.push(RankedOption {
            index,
            label: label.clone(),
            score: DEFAULT_SCORE,
            reason: UNRANKED_REASON.to_string(),
        });
    }
    ranked
}

fn repair_factors(raw: &Value, repairs: &mut Vec<String>) -> BTreeMap<String, f64> {
    let mut factors = BTreeMap::new();
    if let Some(entries) = raw.as_object() {
        for (name, value) in entries {
            match as_number(value) {
                Some(weight) => {
                    factors.insert(name.clone(), weight.clamp(0.0, 1.0));
                }
                None => repairs.push(format!("factor '{name}' is not a number; dropped")),
            }
        }
    }
    if factors.is_empty() {
        repairs.push("factors missing; defaulted".to_string());
        for name in ["mood", "category", "context"] {
            factors.insert(name.to_string(), DEFAULT_SCORE);
        }
    }
    factors
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn as_index(value: &Value) -> Option<usize> {
    let number = as_number(value)?;
    (number >= 0.0 && number.fract() == 0.0).then_some(number as usize)
}

fn index_for_label(label: Option<&Value>, labels: &[String]) -> Option<usize> {
    let wanted = label?.as_str()?.trim().to_lowercase();
    labels
        .iter()
        .position(|label| label.trim().to_lowercase() == wanted)
}

/// Calls the reasoning provider under a timeout and repairs whatever comes
/// back.
pub struct DecisionEngine {
    provider: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl DecisionEngine {
    pub fn new(provider: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn decide(
        &self,
        prompt: &str,
        labels: &[String],
        cancel: &CancelToken,
    ) -> Result<EngineDecision, ReasoningError> {
        let name = self.provider.name().to_string();
        let provider = Arc::clone(&self.provider);
        let prompt_text = prompt.to_string();
        let started = Instant::now();
        let raw = run_with_timeout(&name, self.timeout, cancel, move || {
            provider.complete(&prompt_text)
        })?;
        let decision = repair_decision(&raw, labels)?;
        tracing::debug!(
            provider = %name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            structured = decision.structured,
            repairs = ?decision.repairs,
            "reasoning output repaired"
        );
        Ok(decision)
    }
}
