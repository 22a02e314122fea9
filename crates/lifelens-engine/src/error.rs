use std::time::Duration;

use chrono::{DateTime, Utc};
use lifelens_contracts::{Tier, ValidationError};
use thiserror::Error;

use crate::http::error_chain_text;

/// Failure of one external provider call. Never leaves the engine: the
/// waterfall moves to the next provider and the orchestrator falls back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },
    #[error("{provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
    #[error("{provider} declined: {reason}")]
    Declined { provider: String, reason: String },
    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },
    #[error("{provider} call abandoned after cancellation")]
    Cancelled { provider: String },
}

impl ProviderError {
    pub fn unavailable(provider: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn declined(provider: &str, reason: impl Into<String>) -> Self {
        Self::Declined {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transport(provider: &str, err: &anyhow::Error) -> Self {
        Self::Transport {
            provider: provider.to_string(),
            message: error_chain_text(err, 400),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Raised only when no structurally valid decision can be built from the
/// reasoning output at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reasoning response could not be repaired: {0}")]
pub struct ResponseParseError(pub String);

/// Why the reasoning stage produced no decision; the orchestrator answers
/// either case with a fallback result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasoningError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Parse(#[from] ResponseParseError),
}

/// Caller-visible failures of a decision request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("daily limit of {limit} reached for {tier} tier; resets at {reset_time}")]
    QuotaExceeded {
        tier: Tier,
        limit: u64,
        reset_time: DateTime<Utc>,
    },
    #[error("decision exceeded its {budget:?} budget")]
    DeadlineExceeded { budget: Duration },
    #[error("request cancelled by caller")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl DecisionError {
    /// HTTP status the routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::QuotaExceeded { .. } => 429,
            Self::Cancelled => 499,
            Self::DeadlineExceeded { .. } => 504,
            Self::Internal(_) => 500,
        }
    }
}
