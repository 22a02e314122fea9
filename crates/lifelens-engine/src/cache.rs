use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use lifelens_contracts::{
    Category, DecisionContext, DecisionResult, ImageDescriptor, ImageInput, Tier,
};
use serde::Serialize;
use serde_json::json;

use crate::clock::Clock;
use crate::config::CacheSettings;
use crate::history::PreferenceSnapshot;
use crate::http::stable_hash;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Bounded TTL map. Reads refresh recency; inserts past `max_entries` evict
/// expired entries first, then the least recently used.
pub struct TtlCache<V> {
    name: &'static str,
    default_ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    entries: Mutex<IndexMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(
        name: &'static str,
        default_ttl: Duration,
        max_entries: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            default_ttl,
            max_entries: max_entries.max(1),
            clock,
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let index = entries.get_index_of(key)?;
        if entries[index].expires_at <= now {
            entries.shift_remove_index(index);
            return None;
        }
        tracing::trace!(
            cache = self.name,
            age_s = (now - entries[index].stored_at).num_seconds(),
            "cache hit"
        );
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Stores `value` under `key`, overwriting any previous entry. `ttl` of
    /// `None` uses the namespace default.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = self.lock();
        entries.shift_remove(key);
        if entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        while entries.len() >= self.max_entries {
            if entries.shift_remove_index(0).is_none() {
                break;
            }
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                expires_at,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().shift_remove(key).is_some()
    }

    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(cache = self.name, "cache lock poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub decisions: usize,
    pub descriptions: usize,
    pub preferences: usize,
}

/// Memoization for expensive external calls, one namespace per purpose.
pub struct ResponseCache {
    decisions: TtlCache<DecisionResult>,
    descriptions: TtlCache<ImageDescriptor>,
    preferences: TtlCache<PreferenceSnapshot>,
}

impl ResponseCache {
    pub fn new(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            decisions: TtlCache::new(
                "decisions",
                settings.decision_ttl,
                settings.decision_max_entries,
                clock.clone(),
            ),
            descriptions: TtlCache::new(
                "descriptions",
                settings.description_ttl,
                settings.description_max_entries,
                clock.clone(),
            ),
            preferences: TtlCache::new(
                "preferences",
                settings.preference_ttl,
                settings.preference_max_entries,
                clock,
            ),
        }
    }

    pub fn decisions(&self) -> &TtlCache<DecisionResult> {
        &self.decisions
    }

    pub fn descriptions(&self) -> &TtlCache<ImageDescriptor> {
        &self.descriptions
    }

    pub fn preferences(&self) -> &TtlCache<PreferenceSnapshot> {
        &self.preferences
    }

    pub fn get_decision(&self, key: &str) -> Option<DecisionResult> {
        self.decisions.get(key)
    }

    /// Fallback results are degraded answers and are never memoized; returns
    /// whether the result was stored.
    pub fn set_decision(&self, key: &str, result: &DecisionResult) -> bool {
        if result.fallback {
            tracing::debug!(cache_key = key, "refusing to cache fallback decision");
            return false;
        }
        self.decisions.set(key, result.clone(), None);
        true
    }

    pub fn get_description(&self, key: &str) -> Option<ImageDescriptor> {
        self.descriptions.get(key)
    }

    pub fn set_description(&self, key: &str, descriptor: &ImageDescriptor) {
        self.descriptions.set(key, descriptor.clone(), None);
    }

    pub fn get_preferences(&self, user_id: &str) -> Option<PreferenceSnapshot> {
        self.preferences.get(&preference_key(user_id))
    }

    pub fn set_preferences(&self, snapshot: &PreferenceSnapshot) {
        self.preferences
            .set(&preference_key(&snapshot.user_id), snapshot.clone(), None);
    }

    pub fn invalidate_preferences(&self, user_id: &str) -> bool {
        self.preferences.invalidate(&preference_key(user_id))
    }

    pub fn prune_expired(&self) -> PruneReport {
        PruneReport {
            decisions: self.decisions.prune_expired(),
            descriptions: self.descriptions.prune_expired(),
            preferences: self.preferences.prune_expired(),
        }
    }
}

fn option_hash(option: &ImageInput) -> String {
    stable_hash(&json!({
        "fingerprint": option.fingerprint(),
        "label": option.label,
        "caption": option.caption,
    }))
}

/// Content-addressed key: per-option hashes in input order plus a hash of the
/// context fields. Tier is not part of the key.
pub fn decision_key(options: &[ImageInput], context: &DecisionContext) -> String {
    let option_hashes: Vec<String> = options.iter().map(option_hash).collect();
    let context_hash = stable_hash(&json!({
        "mood": context.mood,
        "category": context.category.map(Category::as_str),
        "question": context.question,
        "weather": context.weather,
    }));
    format!("decision:{}:{context_hash}", option_hashes.join(""))
}

/// Keyed per tier, since tiers unlock different providers.
pub fn description_key(image: &ImageInput, category: Option<Category>, tier: Tier) -> String {
    let hash = stable_hash(&json!({
        "fingerprint": image.fingerprint(),
        "label": image.label,
        "category": category.map(Category::as_str),
        "tier": tier.as_str(),
    }));
    format!("description:{hash}")
}

fn preference_key(user_id: &str) -> String {
    format!("preferences:{user_id}")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use lifelens_contracts::{
        Category, DecisionContext, DecisionResult, ImageInput, RankedOption, Tier,
    };

    use crate::clock::ManualClock;
    use crate::config::CacheSettings;

    use super::{decision_key, description_key, ResponseCache, TtlCache};

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap())
    }

    fn result(fallback: bool) -> DecisionResult {
        DecisionResult {
            recommended_index: 0,
            ranked: vec![
                RankedOption {
                    index: 0,
                    label: "A".to_string(),
                    score: 0.9,
                    reason: "fits".to_string(),
                },
                RankedOption {
                    index: 1,
                    label: "B".to_string(),
                    score: 0.4,
                    reason: "meh".to_string(),
                },
            ],
            reasoning: "A fits better".to_string(),
            confidence: 0.8,
            factors: BTreeMap::new(),
            fallback,
        }
    }

    fn context(mood: Option<&str>) -> DecisionContext {
        DecisionContext {
            question: "Which one should I wear?".to_string(),
            mood: mood.map(str::to_string),
            category: Some(Category::Clothing),
            weather: None,
            user_tier: Tier::Free,
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = clock();
        let cache: TtlCache<u32> =
            TtlCache::new("test", Duration::from_secs(60), 8, Arc::new(clock.clone()));
        cache.set("k", 1, None);
        cache.set("short", 2, Some(Duration::from_secs(5)));
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.get("short"), None);
        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache: TtlCache<u32> =
            TtlCache::new("test", Duration::from_secs(60), 2, Arc::new(clock()));
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3, None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn storing_twice_overwrites() {
        let cache: TtlCache<u32> =
            TtlCache::new("test", Duration::from_secs(60), 4, Arc::new(clock()));
        cache.set("k", 1, None);
        cache.set("k", 2, None);
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
    }

    #[test]
    fn fallback_decisions_are_never_stored() {
        let cache = ResponseCache::new(&CacheSettings::default(), Arc::new(clock()));
        assert!(!cache.set_decision("key", &result(true)));
        assert_eq!(cache.get_decision("key"), None);
        assert!(cache.set_decision("key", &result(false)));
        assert_eq!(cache.get_decision("key"), Some(result(false)));
    }

    #[test]
    fn prune_reports_removed_entries() {
        let clock = clock();
        let cache = ResponseCache::new(&CacheSettings::default(), Arc::new(clock.clone()));
        cache.set_decision("d", &result(false));
        clock.advance(chrono::Duration::minutes(10));
        let report = cache.prune_expired();
        assert_eq!(report.decisions, 1);
        assert_eq!(report.descriptions, 0);
        assert!(cache.decisions().is_empty());
    }

    #[test]
    fn decision_key_is_content_addressed() {
        let a = ImageInput::new(vec![1u8, 2, 3], "Blue Hoodie");
        let b = ImageInput::new(vec![4u8, 5, 6], "Red Hoodie");
        let base = decision_key(&[a.clone(), b.clone()], &context(Some("happy")));

        let mut other_tier = context(Some("happy"));
        other_tier.user_tier = Tier::Premium;
        assert_eq!(base, decision_key(&[a.clone(), b.clone()], &other_tier));

        assert_ne!(base, decision_key(&[b.clone(), a.clone()], &context(Some("happy"))));
        assert_ne!(base, decision_key(&[a.clone(), b.clone()], &context(Some("sad"))));
        let recaptioned = a.clone().with_caption("zip front");
        assert_ne!(base, decision_key(&[recaptioned, b], &context(Some("happy"))));
    }

    #[test]
    fn description_key_tracks_label_category_and_tier() {
        let image = ImageInput::new(vec![9u8; 16], "Salad");
        let food = description_key(&image, Some(Category::Food), Tier::Free);
        assert_eq!(food, description_key(&image, Some(Category::Food), Tier::Free));
        assert_ne!(food, description_key(&image, None, Tier::Free));
        assert_ne!(food, description_key(&image, Some(Category::Food), Tier::Premium));
        let relabeled = ImageInput::new(vec![9u8; 16], "Soup");
        assert_ne!(food, description_key(&relabeled, Some(Category::Food), Tier::Free));
    }
}
