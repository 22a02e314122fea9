use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use lifelens_contracts::records::{HistoryLog, HistoryRecord};
use lifelens_contracts::Category;
use serde::{Deserialize, Serialize};

/// Durable store for served decisions. Writes happen off the request path.
pub trait HistorySink: Send + Sync {
    fn write(&self, record: &HistoryRecord) -> Result<()>;
    /// Newest first.
    fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>>;
}

impl HistorySink for HistoryLog {
    fn write(&self, record: &HistoryRecord) -> Result<()> {
        self.append(record)
    }

    fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.recent_for_user(user_id, limit)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistorySink for InMemoryHistory {
    fn write(&self, record: &HistoryRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        let rows = self
            .records
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?;
        Ok(rows
            .iter()
            .rev()
            .filter(|row| row.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Aggregate of a user's recent decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceSnapshot {
    pub user_id: String,
    pub decisions: u64,
    pub fallback_decisions: u64,
    pub favorite_category: Option<Category>,
    pub category_counts: BTreeMap<String, u64>,
    pub mood_counts: BTreeMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceSnapshot {
    pub fn from_records(user_id: &str, records: &[HistoryRecord], now: DateTime<Utc>) -> Self {
        let mut category_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut mood_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut fallback_decisions = 0;
        for record in records {
            if record.result.fallback {
                fallback_decisions += 1;
            }
            if let Some(category) = record.request.get("category").and_then(|v| v.as_str()) {
                *category_counts.entry(category.to_string()).or_insert(0) += 1;
            }
            if let Some(mood) = record.request.get("mood").and_then(|v| v.as_str()) {
                *mood_counts.entry(mood.to_string()).or_insert(0) += 1;
            }
        }

        // Ties go to the earlier category in declaration order.
        let mut favorite_category: Option<(Category, u64)> = None;
        for category in Category::ALL {
            let count = category_counts.get(category.as_str()).copied().unwrap_or(0);
            if count > 0 && favorite_category.map_or(true, |(_, best)| count > best) {
                favorite_category = Some((category, count));
            }
        }

        Self {
            user_id: user_id.to_string(),
            decisions: records.len() as u64,
            fallback_decisions,
            favorite_category: favorite_category.map(|(category, _)| category),
            category_counts,
            mood_counts,
            updated_at: now,
        }
    }
}
