use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use lifelens_contracts::records::JsonFileStore;
use lifelens_contracts::{QuotaStatus, Tier, UsageKind};
use serde_json::{json, Value};

use crate::clock::{next_utc_midnight, Clock};

/// Durable tier and per-day counter storage behind the quota gate.
pub trait QuotaStore: Send + Sync {
    fn tier(&self, user_id: &str) -> Result<Tier>;
    fn set_tier(&self, user_id: &str, tier: Tier) -> Result<()>;
    fn count(&self, user_id: &str, kind: UsageKind, day: NaiveDate) -> Result<u64>;
    /// Returns the count after the increment.
    fn increment(&self, user_id: &str, kind: UsageKind, day: NaiveDate) -> Result<u64>;
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> anyhow::Error {
    anyhow!("quota store lock poisoned")
}

#[derive(Debug, Default)]
pub struct InMemoryQuotaStore {
    tiers: Mutex<HashMap<String, Tier>>,
    counts: Mutex<HashMap<(String, UsageKind, NaiveDate), u64>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuotaStore for InMemoryQuotaStore {
    fn tier(&self, user_id: &str) -> Result<Tier> {
        let tiers = self.tiers.lock().map_err(lock_err)?;
        Ok(tiers.get(user_id).copied().unwrap_or_default())
    }

    fn set_tier(&self, user_id: &str, tier: Tier) -> Result<()> {
        let mut tiers = self.tiers.lock().map_err(lock_err)?;
        tiers.insert(user_id.to_string(), tier);
        Ok(())
    }

    fn count(&self, user_id: &str, kind: UsageKind, day: NaiveDate) -> Result<u64> {
        let counts = self.counts.lock().map_err(lock_err)?;
        Ok(counts
            .get(&(user_id.to_string(), kind, day))
            .copied()
            .unwrap_or(0))
    }

    fn increment(&self, user_id: &str, kind: UsageKind, day: NaiveDate) -> Result<u64> {
        let mut counts = self.counts.lock().map_err(lock_err)?;
        let slot = counts.entry((user_id.to_string(), kind, day)).or_insert(0);
        *slot += 1;
        Ok(*slot)
    }
}

/// Quota records kept in one JSON object file (`quota.json` in the state dir).
/// Keys are `tier:<user>` and `count:<day>:<kind>:<user>`; yesterday's keys are
/// simply never read again.
#[derive(Debug)]
pub struct FileQuotaStore {
    store: Mutex<JsonFileStore>,
}

impl FileQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: Mutex::new(JsonFileStore::new(path)),
        }
    }

    fn tier_key(user_id: &str) -> String {
        format!("tier:{user_id}")
    }

    fn count_key(user_id: &str, kind: UsageKind, day: NaiveDate) -> String {
        format!("count:{}:{}:{user_id}", day.format("%Y-%m-%d"), kind.as_str())
    }
}

impl QuotaStore for FileQuotaStore {
    fn tier(&self, user_id: &str) -> Result<Tier> {
        let mut store = self.store.lock().map_err(lock_err)?;
        let Some(value) = store.get(&Self::tier_key(user_id))? else {
            return Ok(Tier::default());
        };
        let raw = value
            .as_str()
            .with_context(|| format!("tier for '{user_id}' is not a string"))?;
        raw.parse::<Tier>().map_err(|err| anyhow!(err))
    }

    fn set_tier(&self, user_id: &str, tier: Tier) -> Result<()> {
        let mut store = self.store.lock().map_err(lock_err)?;
        store.set(&Self::tier_key(user_id), json!(tier.as_str()))
    }

    fn count(&self, user_id: &str, kind: UsageKind, day: NaiveDate) -> Result<u64> {
        let mut store = self.store.lock().map_err(lock_err)?;
        Ok(store
            .get(&Self::count_key(user_id, kind, day))?
            .and_then(|value| value.as_u64())
            .unwrap_or(0))
    }

    fn increment(&self, user_id: &str, kind: UsageKind, day: NaiveDate) -> Result<u64> {
        let mut store = self.store.lock().map_err(lock_err)?;
        let next = store.update(&Self::count_key(user_id, kind, day), |current| {
            json!(current.and_then(Value::as_u64).unwrap_or(0) + 1)
        })?;
        Ok(next.as_u64().unwrap_or(0))
    }
}

/// Per-user, per-UTC-day admission control.
///
/// `check` and `record` are separate calls, so two concurrent requests from the
/// same user can both pass the check at `limit - 1`. The overshoot is bounded
/// by the number of that user's requests in flight at once.
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn check(&self, user_id: &str, kind: UsageKind) -> QuotaStatus {
        let now = self.clock.now();
        let reset_time = next_utc_midnight(now);
        let day = now.date_naive();

        let tier = match self.store.tier(user_id) {
            Ok(tier) => tier,
            Err(err) => return fail_open(user_id, Tier::default(), reset_time, &err),
        };
        let used = match self.store.count(user_id, kind, day) {
            Ok(used) => used,
            Err(err) => return fail_open(user_id, tier, reset_time, &err),
        };
        let limit = tier.daily_limit();
        QuotaStatus {
            allowed: limit.map_or(true, |limit| used < limit),
            tier,
            used,
            limit,
            remaining: limit.map(|limit| limit.saturating_sub(used)),
            reset_time,
            error: None,
        }
    }

    /// Counts one served decision. Never fails the caller: store errors are
    /// logged and dropped.
    pub fn record(&self, user_id: &str, kind: UsageKind, metadata: &Value) {
        let day = self.clock.today();
        match self.store.increment(user_id, kind, day) {
            Ok(count) => tracing::debug!(
                user_id,
                kind = kind.as_str(),
                count,
                metadata = %metadata,
                "quota usage recorded"
            ),
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(
                    user_id,
                    kind = kind.as_str(),
                    error = %message,
                    "quota usage record failed"
                );
            }
        }
    }

    pub fn set_tier(&self, user_id: &str, tier: Tier) -> Result<()> {
        self.store
            .set_tier(user_id, tier)
            .with_context(|| format!("failed to set tier for '{user_id}'"))
    }
}

fn fail_open(
    user_id: &str,
    tier: Tier,
    reset_time: DateTime<Utc>,
    err: &anyhow::Error,
) -> QuotaStatus {
    let message = format!("{err:#}");
    tracing::warn!(user_id, error = %message, "quota lookup failed; allowing request");
    let limit = tier.daily_limit();
    QuotaStatus {
        allowed: true,
        tier,
        used: 0,
        limit,
        remaining: limit,
        reset_time,
        error: Some(message),
    }
}
