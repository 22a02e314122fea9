pub mod cache;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod history;
pub mod http;
pub mod orchestrator;
pub mod prompt;
pub mod quota;
pub mod reasoning;
pub mod sentiment;
mod text;
pub mod vision;

pub use cache::{decision_key, description_key, PruneReport, ResponseCache, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use decision::{repair_decision, DecisionEngine, EngineDecision};
pub use error::{DecisionError, ProviderError, ReasoningError, ResponseParseError};
pub use fallback::{FallbackRecommender, MoodBucket};
pub use guard::CancelToken;
pub use history::{HistorySink, InMemoryHistory, PreferenceSnapshot};
pub use orchestrator::{DecisionOrchestrator, DecisionResponse, EngineParts};
pub use prompt::PromptBuilder;
pub use quota::{FileQuotaStore, InMemoryQuotaStore, QuotaGate, QuotaStore};
pub use reasoning::{OpenAiReasoningProvider, ReasoningProvider};
pub use sentiment::{Sentiment, SentimentAnalyzer, SentimentLabel};
pub use vision::{ProviderWaterfall, VisionProvider};
