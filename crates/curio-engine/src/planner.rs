use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use curio_core::ids::ConversationId;
use curio_core::plan::{extract_json_block, ResearchPlan};
use curio_core::provider::{ChatMessage, ChatProvider, ChatRequest};
use curio_core::stream::TokenEvent;
use curio_core::summary::{summarize, SummaryBudget};
use curio_core::turns::ConversationTurn;

use crate::error::EngineError;
use crate::plan_cache::PlanCache;

const PLANNER_SYSTEM_PROMPT: &str = "\
You decide whether answering the user's latest message needs a web search.
Reply with a single JSON object and nothing else:
{\"should_search\": true|false, \"queries\": [\"...\"], \"confidence\": 0.0-1.0}
Rules:
- should_search is false for greetings, chit-chat, and questions already \
answered by the conversation.
- should_search is true for questions about facts, current events, prices, \
versions, or anything that benefits from fresh sources.
- queries: at most 3 focused web search queries, most important first. \
Empty when should_search is false.
- confidence: how sure you are about this decision.";

const SMALLTALK: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "yo",
    "thanks",
    "thank you",
    "thx",
    "ok",
    "okay",
    "cool",
    "nice",
    "great",
    "awesome",
    "lol",
    "haha",
    "yes",
    "no",
    "sure",
    "bye",
    "goodbye",
    "good morning",
    "good afternoon",
    "good evening",
    "good night",
    "how are you",
    "whats up",
    "what's up",
];

/// True for messages that are plainly conversational filler.
fn is_smalltalk(message: &str) -> bool {
    let stripped: String = message
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '!' | '?'))
        .collect();
    let normalized = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    SMALLTALK.contains(&normalized.as_str())
}

/// FNV-1a over the conversation id, the normalized latest message, and the
/// history window size. Stable across runs, unlike `HashMap`'s `RandomState`.
pub fn plan_fingerprint(
    conversation_id: &ConversationId,
    latest_message: &str,
    window: usize,
) -> u64 {
    let normalized = latest_message
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let keyed = format!("{}|{normalized}|{window}", conversation_id.as_str());
    let mut h: u64 = 14695981039346656037;
    for b in keyed.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

/// The JSON shape the planning model is asked to emit. Models sometimes
/// camel-case the key, so both spellings parse.
#[derive(Debug, Deserialize)]
struct PlanDecision {
    #[serde(default, alias = "shouldSearch")]
    should_search: bool,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    confidence: f32,
}

/// Decides whether a message needs web research, and with which queries.
///
/// Decisions are cached by fingerprint; a hit skips the model entirely.
/// Failures never block the pipeline: the planner falls back to a no-search
/// plan and leaves the cache untouched so the next attempt replans.
pub struct SearchPlanner {
    provider: Arc<dyn ChatProvider>,
    cache: Arc<PlanCache>,
}

impl SearchPlanner {
    pub fn new(provider: Arc<dyn ChatProvider>, cache: Arc<PlanCache>) -> Self {
        Self { provider, cache }
    }

    #[instrument(
        skip(self, turns, prior_context, latest_message, now),
        fields(conversation_id = %conversation_id, turns = turns.len())
    )]
    pub async fn plan(
        &self,
        conversation_id: &ConversationId,
        turns: &[ConversationTurn],
        prior_context: Option<&str>,
        latest_message: &str,
        now: DateTime<Utc>,
    ) -> ResearchPlan {
        let fingerprint = plan_fingerprint(conversation_id, latest_message, turns.len());
        if let Some(plan) = self.cache.get(fingerprint, now) {
            debug!(fingerprint, "plan cache hit");
            return plan;
        }

        let summary = summarize(turns, prior_context, &SummaryBudget::default());

        if is_smalltalk(latest_message) {
            debug!("conversational message, skipping search");
            let plan = ResearchPlan {
                should_search: false,
                queries: Vec::new(),
                confidence: 0.95,
                context_summary: summary,
                fingerprint,
                cached_at: now,
            };
            self.cache.insert(conversation_id, plan.clone());
            return plan;
        }

        match self.decide(&summary, latest_message).await {
            Ok(decision) => {
                let plan = ResearchPlan {
                    should_search: decision.should_search,
                    queries: decision.queries,
                    confidence: decision.confidence,
                    context_summary: summary,
                    fingerprint,
                    cached_at: now,
                }
                .sanitized();
                debug!(
                    should_search = plan.should_search,
                    queries = plan.queries.len(),
                    "plan decided"
                );
                self.cache.insert(conversation_id, plan.clone());
                plan
            }
            Err(error) => {
                warn!(%error, "planning failed, defaulting to no search");
                ResearchPlan::no_search(summary, fingerprint, now)
            }
        }
    }

    async fn decide(
        &self,
        summary: &str,
        latest_message: &str,
    ) -> Result<PlanDecision, EngineError> {
        let user = if summary.is_empty() {
            format!("Latest message:\n{latest_message}")
        } else {
            format!("Conversation so far:\n{summary}\n\nLatest message:\n{latest_message}")
        };
        let mut request = ChatRequest::new(vec![
            ChatMessage::system(PLANNER_SYSTEM_PROMPT),
            ChatMessage::user(user),
        ]);
        request.max_tokens = Some(256);
        request.temperature = Some(0.0);

        let mut stream = self.provider.stream(&request).await?;
        let mut raw = String::new();
        while let Some(event) = stream.next().await {
            match event {
                TokenEvent::ContentDelta { delta } => raw.push_str(&delta),
                TokenEvent::Error { error } => return Err(error.into()),
                _ => {}
            }
        }

        serde_json::from_str(extract_json_block(&raw))
            .map_err(|e| EngineError::Internal(format!("unparseable plan: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curio_core::errors::ProviderError;
    use curio_core::plan::MAX_PLAN_QUERIES;
    use curio_llm::{MockChatProvider, MockResponse};

    fn planner_with(responses: Vec<MockResponse>) -> (SearchPlanner, Arc<MockChatProvider>) {
        let mock = Arc::new(MockChatProvider::new(responses));
        let planner = SearchPlanner::new(mock.clone(), Arc::new(PlanCache::new()));
        (planner, mock)
    }

    #[tokio::test]
    async fn smalltalk_skips_the_model() {
        let (planner, mock) = planner_with(vec![]);
        let plan = planner
            .plan(&ConversationId::new(), &[], None, "Thanks!", Utc::now())
            .await;
        assert!(!plan.should_search);
        assert!(plan.queries.is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn model_decision_is_parsed_and_sanitized() {
        let json = r#"{"should_search": true, "queries": ["rust 1.80 release date", "rust release notes", "rust changelog", "extra", "more"], "confidence": 1.7}"#;
        let (planner, mock) = planner_with(vec![MockResponse::stream_text(json)]);
        let plan = planner
            .plan(
                &ConversationId::new(),
                &[],
                None,
                "When was Rust 1.80 released?",
                Utc::now(),
            )
            .await;
        assert!(plan.should_search);
        assert_eq!(plan.queries.len(), MAX_PLAN_QUERIES);
        assert_eq!(plan.confidence, 1.0);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let fenced =
            "```json\n{\"shouldSearch\": false, \"queries\": [], \"confidence\": 0.8}\n```";
        let (planner, _) = planner_with(vec![MockResponse::stream_text(fenced)]);
        let plan = planner
            .plan(
                &ConversationId::new(),
                &[],
                None,
                "What did we decide earlier?",
                Utc::now(),
            )
            .await;
        assert!(!plan.should_search);
        assert_eq!(plan.confidence, 0.8);
    }

    #[tokio::test]
    async fn malformed_output_defaults_to_no_search_and_stays_uncached() {
        let (planner, mock) = planner_with(vec![
            MockResponse::stream_text("search for it, probably"),
            MockResponse::stream_text(
                r#"{"should_search": true, "queries": ["wasi preview 2"], "confidence": 0.9}"#,
            ),
        ]);
        let conversation = ConversationId::new();

        let first = planner
            .plan(&conversation, &[], None, "What is WASI?", Utc::now())
            .await;
        assert!(!first.should_search);
        assert_eq!(first.confidence, 0.0);

        // The failure must not be served from cache.
        let second = planner
            .plan(&conversation, &[], None, "What is WASI?", Utc::now())
            .await;
        assert!(second.should_search);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn provider_failure_defaults_to_no_search() {
        let (planner, mock) = planner_with(vec![MockResponse::Error(ProviderError::Overloaded)]);
        let plan = planner
            .plan(
                &ConversationId::new(),
                &[],
                None,
                "latest node lts version",
                Utc::now(),
            )
            .await;
        assert!(!plan.should_search);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn repeat_question_hits_the_cache() {
        let json = r#"{"should_search": true, "queries": ["tokio runtime internals"], "confidence": 0.9}"#;
        let (planner, mock) = planner_with(vec![MockResponse::stream_text(json)]);
        let conversation = ConversationId::new();
        let now = Utc::now();

        let first = planner
            .plan(&conversation, &[], None, "How does tokio schedule tasks?", now)
            .await;
        let second = planner
            .plan(
                &conversation,
                &[],
                None,
                "  how does TOKIO schedule tasks? ",
                now,
            )
            .await;
        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(second.should_search);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let json = r#"{"should_search": true, "queries": ["q"], "confidence": 0.9}"#;
        let (planner, mock) = planner_with(vec![
            MockResponse::stream_text(json),
            MockResponse::stream_text(json),
        ]);
        let conversation = ConversationId::new();
        let now = Utc::now();

        planner
            .plan(&conversation, &[], None, "same question", now)
            .await;
        planner
            .plan(
                &conversation,
                &[],
                None,
                "same question",
                now + chrono::Duration::seconds(crate::plan_cache::PLAN_TTL_SECS + 1),
            )
            .await;
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_plan() {
        let json = r#"{"should_search": true, "queries": ["q"], "confidence": 0.9}"#;
        let mock = Arc::new(MockChatProvider::new(vec![
            MockResponse::stream_text(json),
            MockResponse::stream_text(json),
        ]));
        let cache = Arc::new(PlanCache::new());
        let planner = SearchPlanner::new(mock.clone(), cache.clone());
        let conversation = ConversationId::new();
        let now = Utc::now();

        planner
            .plan(&conversation, &[], None, "same question", now)
            .await;
        cache.invalidate(&conversation);
        planner
            .plan(&conversation, &[], None, "same question", now)
            .await;
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn fingerprint_changes_with_window_and_conversation() {
        let conversation = ConversationId::new();
        let a = plan_fingerprint(&conversation, "same question", 2);
        let b = plan_fingerprint(&conversation, "same question", 3);
        let c = plan_fingerprint(&ConversationId::new(), "same question", 2);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn smalltalk_detection() {
        assert!(is_smalltalk("Thanks!"));
        assert!(is_smalltalk("  HELLO  "));
        assert!(is_smalltalk("good morning"));
        assert!(is_smalltalk("how are you?"));
        assert!(!is_smalltalk("thanks, but what about prices?"));
        assert!(!is_smalltalk("What is the capital of France?"));
    }
}
