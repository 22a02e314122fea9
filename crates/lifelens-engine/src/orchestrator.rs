use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use lifelens_contracts::models::{ProviderCatalog, ProviderSelector};
use lifelens_contracts::records::{HistoryLog, HistoryRecord};
use lifelens_contracts::{
    Category, DecisionContext, DecisionRequest, DecisionResult, ImageDescriptor, ImageInput,
    QuotaStatus, Tier, UsageKind, ValidatedRequest,
};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::{decision_key, PruneReport, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::decision::DecisionEngine;
use crate::error::DecisionError;
use crate::fallback::FallbackRecommender;
use crate::guard::{CancelToken, POLL_SLICE};
use crate::history::{HistorySink, PreferenceSnapshot};
use crate::prompt::PromptBuilder;
use crate::quota::{FileQuotaStore, QuotaGate, QuotaStore};
use crate::reasoning::{OpenAiReasoningProvider, ReasoningProvider};
use crate::sentiment::SentimentAnalyzer;
use crate::vision::ProviderWaterfall;

pub const QUOTA_FILE: &str = "quota.json";
pub const HISTORY_FILE: &str = "history.jsonl";
const PREFERENCE_WINDOW: usize = 200;
/// Share of the decision budget held back from provider calls so a fallback
/// result can still be served inside it.
const FALLBACK_RESERVE_DIVISOR: u32 = 10;

/// The `200` payload of a decision request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub id: String,
    pub result: DecisionResult,
    pub processing_time_ms: u64,
    pub usage: QuotaStatus,
    pub cached: bool,
}

/// Collaborators an orchestrator is assembled from. `open` wires the
/// production set; tests pass stubs.
pub struct EngineParts {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub quota_store: Arc<dyn QuotaStore>,
    pub history: Arc<dyn HistorySink>,
    pub waterfall: ProviderWaterfall,
    pub reasoning: Arc<dyn ReasoningProvider>,
}

struct Resolved {
    result: DecisionResult,
    cached: bool,
}

struct Pipeline {
    cache: Arc<ResponseCache>,
    waterfall: ProviderWaterfall,
    prompts: PromptBuilder,
    engine: DecisionEngine,
    fallback: FallbackRecommender,
}

impl Pipeline {
    /// Cache lookup, then describe, prompt and reason. Provider failures end
    /// in a fallback result; only cancellation is an error here.
    fn resolve(
        &self,
        options: &[ImageInput],
        context: &DecisionContext,
        cancel: &CancelToken,
    ) -> Result<Resolved, DecisionError> {
        let cache_key = decision_key(options, context);
        if let Some(result) = self.cache.get_decision(&cache_key) {
            tracing::debug!(cache_key = %cache_key, "decision cache hit");
            return Ok(Resolved {
                result,
                cached: true,
            });
        }

        let descriptors = self
            .waterfall
            .describe_all(options, context.category, context.user_tier, cancel);
        if cancel.is_cancelled() {
            return Err(DecisionError::Cancelled);
        }

        let prompt = self.prompts.build(&descriptors, context);
        let labels: Vec<String> = descriptors.iter().map(|row| row.label.clone()).collect();
        let result = match self.engine.decide(&prompt, &labels, cancel) {
            Ok(decision) if decision.structured => decision.result,
            Ok(_) => {
                tracing::warn!(
                    provider = self.engine.provider_name(),
                    cause = "reasoning output held no JSON object",
                    "serving fallback recommendation"
                );
                self.fallback.recommend(options, context)
            }
            Err(err) => {
                if cancel.is_cancelled() {
                    return Err(DecisionError::Cancelled);
                }
                tracing::warn!(
                    provider = self.engine.provider_name(),
                    cause = %err,
                    "serving fallback recommendation"
                );
                self.fallback.recommend(options, context)
            }
        };

        if self.cache.set_decision(&cache_key, &result) {
            tracing::debug!(cache_key = %cache_key, "decision cached");
        }
        Ok(Resolved {
            result,
            cached: false,
        })
    }
}

/// Runs one decision request end to end: validation, quota, cache, vision
/// waterfall, reasoning with repair, fallback, and the deferred bookkeeping.
pub struct DecisionOrchestrator {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    quota: QuotaGate,
    history: Arc<dyn HistorySink>,
    sentiment: SentimentAnalyzer,
    pipeline: Arc<Pipeline>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl DecisionOrchestrator {
    /// Production wiring: system clock, file-backed quota and history under
    /// `state_dir`, providers from the default catalog.
    pub fn open(config: EngineConfig, state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create {}", state_dir.display()))?;
        let catalog = ProviderCatalog::new(None);
        let waterfall = ProviderWaterfall::from_config(&config, &catalog)?;
        let reasoning = OpenAiReasoningProvider::new(
            &config.openai,
            &ProviderSelector::new(Some(catalog)),
            config.reasoning_timeout,
        )?;
        tracing::debug!(
            state_dir = %state_dir.display(),
            vision = ?waterfall.provider_names(),
            reasoning_model = reasoning.model(),
            "decision engine opened"
        );
        Ok(Self::from_parts(EngineParts {
            config,
            clock: Arc::new(SystemClock),
            quota_store: Arc::new(FileQuotaStore::new(state_dir.join(QUOTA_FILE))),
            history: Arc::new(HistoryLog::new(state_dir.join(HISTORY_FILE))),
            waterfall,
            reasoning: Arc::new(reasoning),
        }))
    }

    pub fn from_parts(parts: EngineParts) -> Self {
        let EngineParts {
            config,
            clock,
            quota_store,
            history,
            waterfall,
            reasoning,
        } = parts;
        let cache = Arc::new(ResponseCache::new(&config.cache, Arc::clone(&clock)));
        let pipeline = Pipeline {
            cache: Arc::clone(&cache),
            waterfall: waterfall.with_cache(cache),
            prompts: PromptBuilder::new(),
            engine: DecisionEngine::new(reasoning, config.reasoning_timeout),
            fallback: FallbackRecommender::new(),
        };
        Self {
            quota: QuotaGate::new(quota_store, Arc::clone(&clock)),
            config,
            clock,
            history,
            sentiment: SentimentAnalyzer::new(),
            pipeline: Arc::new(pipeline),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.pipeline.cache
    }

    pub fn decide(
        &self,
        user_id: &str,
        request: &DecisionRequest,
        cancel: &CancelToken,
    ) -> Result<DecisionResponse, DecisionError> {
        let started = Instant::now();
        let mut validated = request.validate()?;
        self.infer_mood(&mut validated);

        let status = self.quota.check(user_id, validated.kind);
        if !status.allowed {
            tracing::info!(user_id, tier = %status.tier, used = status.used, "daily quota exhausted");
            return Err(DecisionError::QuotaExceeded {
                tier: status.tier,
                limit: status.limit.unwrap_or(status.used),
                reset_time: status.reset_time,
            });
        }

        let context = validated.context(status.tier);
        let resolved = self.resolve_within_budget(&validated.options, context, cancel, started)?;
        let processing_time_ms = started.elapsed().as_millis() as u64;
        let id = Uuid::new_v4().to_string();
        tracing::info!(
            user_id,
            id = %id,
            cached = resolved.cached,
            fallback = resolved.result.fallback,
            elapsed_ms = processing_time_ms,
            "decision served"
        );

        self.spawn_bookkeeping(
            &id,
            user_id,
            &validated,
            &resolved.result,
            processing_time_ms,
            resolved.cached,
        );

        Ok(DecisionResponse {
            id,
            result: resolved.result,
            processing_time_ms,
            usage: projected_usage(status),
            cached: resolved.cached,
        })
    }

    /// Describes a single image with the vision waterfall, outside any
    /// decision.
    pub fn describe(
        &self,
        image: &ImageInput,
        category: Option<Category>,
        tier: Tier,
    ) -> ImageDescriptor {
        self.pipeline
            .waterfall
            .describe(image, category, tier, &CancelToken::new())
    }

    pub fn quota_status(&self, user_id: &str, kind: UsageKind) -> QuotaStatus {
        self.quota.check(user_id, kind)
    }

    pub fn set_tier(&self, user_id: &str, tier: Tier) -> Result<()> {
        self.quota.set_tier(user_id, tier)
    }

    /// Memoized per user until the next recorded decision or the preference
    /// TTL.
    pub fn preferences(&self, user_id: &str) -> Result<PreferenceSnapshot> {
        let cache = &self.pipeline.cache;
        if let Some(snapshot) = cache.get_preferences(user_id) {
            return Ok(snapshot);
        }
        let records = self.history.recent(user_id, PREFERENCE_WINDOW)?;
        let snapshot = PreferenceSnapshot::from_records(user_id, &records, self.clock.now());
        cache.set_preferences(&snapshot);
        Ok(snapshot)
    }

    pub fn recent_history(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryRecord>> {
        self.history.recent(user_id, limit)
    }

    pub fn prune_cache(&self) -> PruneReport {
        self.pipeline.cache.prune_expired()
    }

    /// Waits for deferred quota and history writes. Returns how many jobs
    /// were joined.
    pub fn flush_background(&self) -> Result<usize> {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self
                .background
                .lock()
                .map_err(|_| anyhow!("background job list poisoned"))?;
            pending.drain(..).collect()
        };
        let joined = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("background bookkeeping job panicked");
            }
        }
        Ok(joined)
    }

    fn infer_mood(&self, validated: &mut ValidatedRequest) {
        if validated.mood.is_some() || !self.config.infer_mood {
            return;
        }
        if let Some(mood) = self.sentiment.infer_mood(&validated.question) {
            tracing::debug!(mood, "mood inferred from question");
            validated.mood = Some(mood.to_string());
        }
    }

    /// Runs the pipeline on a worker and waits until it answers, the caller
    /// cancels, or the decision budget runs out. Provider calls on the worker
    /// stop at the budget minus a reserve, so slow or hung providers end in
    /// the fallback result rather than a 504. Abandoned workers see a
    /// cancelled token and stop at their next checkpoint. A worker that dies
    /// without answering is served the fallback result.
    fn resolve_within_budget(
        &self,
        options: &[ImageInput],
        context: DecisionContext,
        cancel: &CancelToken,
        started: Instant,
    ) -> Result<Resolved, DecisionError> {
        let budget = self.config.decision_budget;
        let worker_cancel = CancelToken::with_deadline(
            started + budget.saturating_sub(budget / FALLBACK_RESERVE_DIVISOR),
        );
        let (tx, rx) = mpsc::channel();
        let pipeline = Arc::clone(&self.pipeline);
        let worker_options = options.to_vec();
        let worker_context = context.clone();
        let token = worker_cancel.clone();
        thread::Builder::new()
            .name("lifelens-decision".to_string())
            .spawn(move || {
                let _ = tx.send(pipeline.resolve(&worker_options, &worker_context, &token));
            })
            .map_err(|err| DecisionError::Internal(format!("decision worker spawn failed: {err}")))?;

        loop {
            if cancel.is_cancelled() {
                worker_cancel.cancel();
                return Err(DecisionError::Cancelled);
            }
            let elapsed = started.elapsed();
            if elapsed >= budget {
                worker_cancel.cancel();
                tracing::warn!(budget_ms = budget.as_millis() as u64, "decision budget exceeded");
                return Err(DecisionError::DeadlineExceeded { budget });
            }
            match rx.recv_timeout((budget - elapsed).min(POLL_SLICE)) {
                Ok(outcome) => return outcome,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    tracing::warn!(
                        cause = "decision worker exited without a result",
                        "serving fallback recommendation"
                    );
                    return Ok(Resolved {
                        result: self.pipeline.fallback.recommend(options, &context),
                        cached: false,
                    });
                }
            }
        }
    }

    /// Quota usage and history are recorded off the response path; failures
    /// are logged and never reach the caller.
    fn spawn_bookkeeping(
        &self,
        id: &str,
        user_id: &str,
        validated: &ValidatedRequest,
        result: &DecisionResult,
        processing_time_ms: u64,
        cached: bool,
    ) {
        let request = serde_json::to_value(validated).unwrap_or_else(|err| {
            tracing::warn!(user_id, error = %err, "request not serializable for history");
            Value::Null
        });
        let record = HistoryRecord::new(
            id,
            user_id,
            validated.kind,
            &request,
            result,
            processing_time_ms,
            cached,
        );
        let metadata = json!({
            "id": id,
            "cached": cached,
            "fallback": result.fallback,
        });
        let quota = self.quota.clone();
        let history = Arc::clone(&self.history);
        let cache = Arc::clone(&self.pipeline.cache);
        let kind = validated.kind;
        let user = user_id.to_string();

        let spawned = thread::Builder::new()
            .name("lifelens-bookkeeping".to_string())
            .spawn(move || {
                quota.record(&user, kind, &metadata);
                if let Err(err) = history.write(&record) {
                    let message = format!("{err:#}");
                    tracing::warn!(user_id = %user, error = %message, "history write failed");
                }
                cache.invalidate_preferences(&user);
            });
        match spawned {
            Ok(handle) => match self.background.lock() {
                Ok(mut pending) => {
                    pending.retain(|job| !job.is_finished());
                    pending.push(handle);
                }
                Err(_) => tracing::warn!(user_id, "background job list poisoned; job untracked"),
            },
            Err(err) => tracing::warn!(user_id, error = %err, "bookkeeping worker spawn failed"),
        }
    }
}

/// Status as it will read once this decision is counted.
fn projected_usage(mut status: QuotaStatus) -> QuotaStatus {
    status.used += 1;
    status.remaining = status.limit.map(|limit| limit.saturating_sub(status.used));
    status
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::{TimeZone, Utc};
    use lifelens_contracts::{
        Category, DecisionRequest, ImageInput, SourceProvider, Tier, UsageKind,
    };

    use crate::clock::{Clock, ManualClock};
    use crate::config::EngineConfig;
    use crate::error::{DecisionError, ProviderError};
    use crate::guard::CancelToken;
    use crate::history::{HistorySink, InMemoryHistory};
    use crate::quota::{InMemoryQuotaStore, QuotaStore};
    use crate::reasoning::ReasoningProvider;
    use crate::vision::{ProviderWaterfall, VisionProvider};

    use super::{DecisionOrchestrator, EngineParts};

    struct CountingVision {
        calls: AtomicUsize,
    }

    impl VisionProvider for CountingVision {
        fn name(&self) -> &str {
            "counting-vision"
        }

        fn source(&self) -> SourceProvider {
            SourceProvider::OpenaiVision
        }

        fn is_available(&self, _tier: Tier) -> bool {
            true
        }

        fn describe(
            &self,
            image: &ImageInput,
            _category: Option<Category>,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("A {} on a store mannequin", image.label.to_lowercase()))
        }
    }

    enum Reply {
        Text(&'static str),
        Fail,
        Sleep(Duration),
    }

    struct ScriptedReasoner {
        reply: Reply,
        prompts: Mutex<Vec<String>>,
    }

    impl ReasoningProvider for ScriptedReasoner {
        fn name(&self) -> &str {
            "scripted-reasoner"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Fail => Err(ProviderError::unavailable("scripted-reasoner", "down")),
                Reply::Sleep(pause) => {
                    thread::sleep(*pause);
                    Ok("{}".to_string())
                }
            }
        }
    }

    struct Harness {
        orchestrator: DecisionOrchestrator,
        vision: Arc<CountingVision>,
        reasoner: Arc<ScriptedReasoner>,
        store: Arc<InMemoryQuotaStore>,
        history: Arc<InMemoryHistory>,
        clock: ManualClock,
    }

    fn harness_with(reply: Reply, configure: impl FnOnce(&mut EngineConfig)) -> Harness {
        let mut config = EngineConfig::default();
        config.infer_mood = true;
        configure(&mut config);
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap());
        let vision = Arc::new(CountingVision {
            calls: AtomicUsize::new(0),
        });
        let reasoner = Arc::new(ScriptedReasoner {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let store = Arc::new(InMemoryQuotaStore::new());
        let history = Arc::new(InMemoryHistory::new());
        let vision_dyn: Arc<dyn VisionProvider> = vision.clone();
        let orchestrator = DecisionOrchestrator::from_parts(EngineParts {
            waterfall: ProviderWaterfall::new(vec![vision_dyn], config.vision_timeout),
            config,
            clock: Arc::new(clock.clone()),
            quota_store: store.clone(),
            history: history.clone(),
            reasoning: reasoner.clone(),
        });
        Harness {
            orchestrator,
            vision,
            reasoner,
            store,
            history,
            clock,
        }
    }

    fn harness(reply: Reply) -> Harness {
        harness_with(reply, |_| {})
    }

    fn hoodie_request() -> DecisionRequest {
        DecisionRequest {
            question: "Which hoodie should I wear today?".to_string(),
            mood: Some("happy".to_string()),
            category: Some("clothing".to_string()),
            images: vec![
                ImageInput::new(vec![0xFF, 0xD8, 0xFF, 0x01], "Blue Hoodie"),
                ImageInput::new(vec![0xFF, 0xD8, 0xFF, 0x02], "Red Hoodie"),
            ],
            labels: Vec::new(),
            weather: None,
        }
    }

    #[test]
    fn two_hoodies_with_partial_reasoning_output() -> anyhow::Result<()> {
        let h = harness(Reply::Text(
            "{\"ranked\": [{\"index\": 1, \"score\": 0.92, \"reason\": \"Red fits an upbeat mood\"}], \"reasoning\": \"Go bold.\"}",
        ));
        let response = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        let result = &response.result;
        assert_eq!(result.check_invariants(2), Ok(()));
        assert!(!result.fallback);
        assert_eq!(result.recommended_index, 1);
        assert_eq!(result.ranked[0].label, "Red Hoodie");
        assert_eq!(result.ranked[1].label, "Blue Hoodie");
        assert!(!response.cached);
        assert_eq!(response.usage.used, 1);
        assert_eq!(response.usage.remaining, Some(9));
        assert_eq!(h.vision.calls.load(Ordering::SeqCst), 2);

        let prompt = h.reasoner.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("A blue hoodie on a store mannequin"));
        assert!(prompt.contains("Ignore backgrounds, mannequins"));

        h.orchestrator.flush_background()?;
        assert_eq!(h.history.len(), 1);
        assert_eq!(
            h.store.count("user-1", UsageKind::Decision, h.clock.today())?,
            1
        );
        Ok(())
    }

    #[test]
    fn output_without_json_falls_back() -> anyhow::Result<()> {
        let h = harness(Reply::Text("I would go with the red one, honestly."));
        let response = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        assert_eq!(response.result.check_invariants(2), Ok(()));
        assert!(response.result.fallback);
        Ok(())
    }

    #[test]
    fn repeat_request_is_served_from_cache() -> anyhow::Result<()> {
        let h = harness(Reply::Text(
            "{\"recommendedIndex\": 0, \"ranked\": [{\"index\": 0, \"score\": 0.8}, {\"index\": 1, \"score\": 0.4}]}",
        ));
        let first = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        let second = h
            .orchestrator
            .decide("user-2", &hoodie_request(), &CancelToken::new())?;
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.result, second.result);
        assert_eq!(h.vision.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.reasoner.prompts.lock().unwrap().len(), 1);

        h.orchestrator.flush_background()?;
        assert_eq!(
            h.store.count("user-2", UsageKind::Decision, h.clock.today())?,
            1
        );
        Ok(())
    }

    #[test]
    fn fallback_results_are_not_cached() -> anyhow::Result<()> {
        let h = harness(Reply::Fail);
        let first = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        assert!(first.result.fallback);
        assert_eq!(first.result.check_invariants(2), Ok(()));
        let second = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        assert!(!second.cached);
        assert_eq!(h.reasoner.prompts.lock().unwrap().len(), 2);
        assert_eq!(first.result, second.result);
        Ok(())
    }

    #[test]
    fn exhausted_quota_is_rejected_before_any_provider_call() -> anyhow::Result<()> {
        let h = harness(Reply::Fail);
        for _ in 0..10 {
            h.store
                .increment("user-1", UsageKind::Decision, h.clock.today())?;
        }
        let err = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.status_code(), 429);
        assert!(matches!(
            err,
            DecisionError::QuotaExceeded { tier: Tier::Free, limit: 10, .. }
        ));
        assert_eq!(h.vision.calls.load(Ordering::SeqCst), 0);

        h.orchestrator.set_tier("user-1", Tier::Premium)?;
        assert!(h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())
            .is_ok());
        Ok(())
    }

    #[test]
    fn invalid_request_is_a_400() {
        let h = harness(Reply::Fail);
        let mut request = hoodie_request();
        request.images.truncate(1);
        let err = h
            .orchestrator
            .decide("user-1", &request, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn slow_reasoning_within_the_budget_falls_back() -> anyhow::Result<()> {
        let h = harness_with(Reply::Sleep(Duration::from_secs(3)), |config| {
            config.decision_budget = Duration::from_secs(1);
        });
        let started = Instant::now();
        let response = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(response.result.fallback);
        assert_eq!(response.result.check_invariants(2), Ok(()));
        h.orchestrator.flush_background()?;
        assert_eq!(
            h.store.count("user-1", UsageKind::Decision, h.clock.today())?,
            1
        );
        Ok(())
    }

    struct HungVision {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl VisionProvider for HungVision {
        fn name(&self) -> &str {
            self.name
        }

        fn source(&self) -> SourceProvider {
            SourceProvider::GeminiVision
        }

        fn is_available(&self, _tier: Tier) -> bool {
            true
        }

        fn describe(
            &self,
            _image: &ImageInput,
            _category: Option<Category>,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_secs(5));
            Ok("too late".to_string())
        }
    }

    #[test]
    fn hung_providers_past_the_budget_still_fall_back() -> anyhow::Result<()> {
        let mut config = EngineConfig::default();
        config.vision_timeout = Duration::from_millis(700);
        config.reasoning_timeout = Duration::from_millis(1500);
        config.decision_budget = Duration::from_secs(2);
        assert!(config.vision_timeout * 3 + config.reasoning_timeout > config.decision_budget);

        let calls = Arc::new(AtomicUsize::new(0));
        let vision: Vec<Arc<dyn VisionProvider>> = ["openai", "gemini", "huggingface"]
            .into_iter()
            .map(|name| {
                Arc::new(HungVision {
                    name,
                    calls: Arc::clone(&calls),
                }) as Arc<dyn VisionProvider>
            })
            .collect();
        let reasoner = Arc::new(ScriptedReasoner {
            reply: Reply::Sleep(Duration::from_secs(5)),
            prompts: Mutex::new(Vec::new()),
        });
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap());
        let orchestrator = DecisionOrchestrator::from_parts(EngineParts {
            waterfall: ProviderWaterfall::new(vision, config.vision_timeout),
            config,
            clock: Arc::new(clock),
            quota_store: Arc::new(InMemoryQuotaStore::new()),
            history: Arc::new(InMemoryHistory::new()),
            reasoning: reasoner,
        });
        orchestrator.set_tier("user-1", Tier::Premium)?;

        let started = Instant::now();
        let response = orchestrator.decide("user-1", &hoodie_request(), &CancelToken::new())?;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(response.result.fallback);
        assert!(!response.cached);
        assert_eq!(response.result.check_invariants(2), Ok(()));
        assert!(calls.load(Ordering::SeqCst) >= 2);
        Ok(())
    }

    #[test]
    fn caller_cancellation_is_reported() {
        let h = harness(Reply::Sleep(Duration::from_secs(2)));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = h
            .orchestrator
            .decide("user-1", &hoodie_request(), &cancel)
            .unwrap_err();
        assert_eq!(err, DecisionError::Cancelled);
    }

    #[test]
    fn missing_mood_is_inferred_from_the_question() -> anyhow::Result<()> {
        let h = harness(Reply::Fail);
        let mut request = hoodie_request();
        request.mood = None;
        request.question = "I'm so excited for tonight, which hoodie?".to_string();
        h.orchestrator
            .decide("user-1", &request, &CancelToken::new())?;
        let prompt = h.reasoner.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("MOOD: happy"));
        Ok(())
    }

    #[test]
    fn preferences_are_memoized_until_next_decision() -> anyhow::Result<()> {
        let h = harness(Reply::Fail);
        h.orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        h.orchestrator.flush_background()?;
        let first = h.orchestrator.preferences("user-1")?;
        assert_eq!(first.decisions, 1);
        assert_eq!(first.fallback_decisions, 1);
        assert_eq!(first.favorite_category, Some(Category::Clothing));
        assert_eq!(first.mood_counts.get("happy"), Some(&1));

        h.clock.advance(chrono::Duration::minutes(5));
        assert_eq!(h.orchestrator.preferences("user-1")?, first);

        h.orchestrator
            .decide("user-1", &hoodie_request(), &CancelToken::new())?;
        h.orchestrator.flush_background()?;
        let second = h.orchestrator.preferences("user-1")?;
        assert_eq!(second.decisions, 2);
        assert_eq!(h.orchestrator.recent_history("user-1", 10)?.len(), 2);
        assert_eq!(h.history.recent("user-1", 1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn text_options_skip_vision_and_count_separately() -> anyhow::Result<()> {
        let h = harness(Reply::Fail);
        let request = DecisionRequest {
            question: "Pizza or pasta tonight?".to_string(),
            mood: None,
            category: Some("food".to_string()),
            images: vec![ImageInput::text_option("Pizza"), ImageInput::text_option("Pasta")],
            labels: Vec::new(),
            weather: None,
        };
        let response = h
            .orchestrator
            .decide("user-1", &request, &CancelToken::new())?;
        assert_eq!(response.result.ranked.len(), 2);
        assert_eq!(h.vision.calls.load(Ordering::SeqCst), 0);
        h.orchestrator.flush_background()?;
        assert_eq!(
            h.store
                .count("user-1", UsageKind::TextDecision, h.clock.today())?,
            1
        );
        assert_eq!(
            h.store.count("user-1", UsageKind::Decision, h.clock.today())?,
            0
        );
        Ok(())
    }
}
