use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription level. Ordered so that `tier >= Tier::Premium` reads naturally.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Unlimited,
}

impl Tier {
    /// `None` means no daily cap.
    pub fn daily_limit(self) -> Option<u64> {
        match self {
            Self::Free => Some(10),
            Self::Premium => Some(1000),
            Self::Unlimited => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Unlimited => "unlimited",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" | "pro" => Ok(Self::Premium),
            "unlimited" => Ok(Self::Unlimited),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    #[default]
    Decision,
    TextDecision,
}

impl UsageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::TextDecision => "text_decision",
        }
    }
}

impl FromStr for UsageKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "decision" => Ok(Self::Decision),
            "text_decision" | "text" => Ok(Self::TextDecision),
            other => Err(format!("unknown usage kind '{other}'")),
        }
    }
}

/// Outcome of a quota check. `limit`/`remaining` are `None` for unlimited tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub allowed: bool,
    pub tier: Tier,
    pub used: u64,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
