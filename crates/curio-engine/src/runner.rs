use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use curio_core::frames::{GenerationStage, SourceRef, StreamFrame};
use curio_core::ids::{ConversationId, GenerationId, MessageId};
use curio_core::provider::ChatRequest;
use curio_core::search::{ScrapedSource, SearchResult, MAX_SCRAPED_SOURCES};
use curio_core::turns::TurnRole;
use curio_core::validate::ContextReference;
use curio_search::{SearchExecutor, SearchOutcome};
use curio_scrape::Scraper;
use curio_store::conversations::ConversationRepo;
use curio_store::generations::GenerationRepo;
use curio_telemetry::MetricsRecorder;

use crate::error::EngineError;
use crate::generator::StreamingGenerator;
use crate::planner::SearchPlanner;
use crate::prompt::{self, PromptInputs};

/// Turns fetched as prompt history.
pub const RECENT_TURN_WINDOW: usize = 20;

const ANSWER_MAX_TOKENS: u32 = 2048;
const ANSWER_TEMPERATURE: f64 = 0.6;

/// One triggered generation.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub conversation_id: ConversationId,
    pub generation_id: GenerationId,
    pub assistant_message_id: MessageId,
    pub message: String,
    pub conversation_context: Option<String>,
    pub references: Vec<ContextReference>,
}

struct RunReport {
    content: String,
    sources: Vec<SourceRef>,
}

/// Drives one generation through planning, search, scraping, and synthesis,
/// emitting every observable step as a frame on the channel.
///
/// The runner writes only the `sources` and `error_details` columns itself;
/// state, content, and the frame log belong to whoever consumes the channel.
pub struct ResearchRunner {
    planner: SearchPlanner,
    executor: SearchExecutor,
    scraper: Scraper,
    generator: StreamingGenerator,
    conversations: ConversationRepo,
    generations: GenerationRepo,
    metrics: Arc<MetricsRecorder>,
}

impl ResearchRunner {
    pub fn new(
        planner: SearchPlanner,
        executor: SearchExecutor,
        scraper: Scraper,
        generator: StreamingGenerator,
        conversations: ConversationRepo,
        generations: GenerationRepo,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            planner,
            executor,
            scraper,
            generator,
            conversations,
            generations,
            metrics,
        }
    }

    /// Run the full pipeline. Always ends the frame stream with a terminal
    /// frame; failures are reported there in client-safe form while the raw
    /// detail goes to the generation's error record.
    #[instrument(
        skip(self, request, cancel, frames),
        fields(
            generation_id = %request.generation_id,
            conversation_id = %request.conversation_id,
        )
    )]
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
        frames: mpsc::Sender<StreamFrame>,
    ) {
        self.metrics.gauge_inc("generations.active", &[], 1.0);
        let started = Instant::now();

        match self.run_inner(&request, &cancel, &frames).await {
            Ok(report) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    sources = report.sources.len(),
                    "generation complete"
                );
                let frame = StreamFrame::Complete {
                    message_id: request.assistant_message_id.clone(),
                    content: report.content,
                    sources: report.sources,
                };
                if frames.send(frame).await.is_err() {
                    warn!("frame channel closed before completion");
                }
            }
            Err(failure) => {
                match &failure {
                    EngineError::Aborted => info!("generation cancelled"),
                    other => error!(error = %other, "generation failed"),
                }
                if let Err(store_error) = self
                    .generations
                    .record_error(&request.generation_id, &failure.to_string())
                {
                    warn!(error = %store_error, "failed to record generation error");
                }
                let frame = StreamFrame::Error {
                    error: failure.user_message().to_string(),
                };
                if frames.send(frame).await.is_err() {
                    warn!("frame channel closed before the error could be reported");
                }
            }
        }

        self.metrics.gauge_inc("generations.active", &[], -1.0);
    }

    async fn run_inner(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
        frames: &mpsc::Sender<StreamFrame>,
    ) -> Result<RunReport, EngineError> {
        self.progress(frames, GenerationStage::Planning, "Deciding how to answer")
            .await?;
        let stage_started = Instant::now();

        let mut turns = self
            .conversations
            .recent_turns(&request.conversation_id, RECENT_TURN_WINDOW)?;
        // The triggering user turn is already persisted; keep it out of the
        // prompt history so it only appears as the latest message.
        if turns
            .last()
            .is_some_and(|t| t.role == TurnRole::User && t.text == request.message)
        {
            turns.pop();
        }

        let plan = self
            .planner
            .plan(
                &request.conversation_id,
                &turns,
                request.conversation_context.as_deref(),
                &request.message,
                Utc::now(),
            )
            .await;
        self.stage_done("planning", stage_started);
        self.checkpoint(cancel)?;

        let mut results: Vec<SearchResult> = Vec::new();
        let searched = plan.should_search;
        if searched {
            self.progress(frames, GenerationStage::Searching, "Searching the web")
                .await?;
            let stage_started = Instant::now();
            let outcome = self.executor.execute(&plan.queries, &request.message).await;
            self.record_search(&request.generation_id, &outcome);
            results = outcome.results;

            let tool = StreamFrame::ToolResult {
                tool_name: "web_search".into(),
                result: serde_json::json!({
                    "queries": plan.queries,
                    "resultCount": results.iter().filter(|r| !r.is_fallback()).count(),
                }),
                duration_ms: stage_started.elapsed().as_millis() as u64,
            };
            frames.send(tool).await.map_err(|_| EngineError::Aborted)?;
            self.stage_done("searching", stage_started);
            self.checkpoint(cancel)?;
        }

        let mut scraped: Vec<ScrapedSource> = Vec::new();
        if results.iter().any(|r| !r.is_fallback()) {
            self.progress(frames, GenerationStage::Scraping, "Reading the top sources")
                .await?;
            let stage_started = Instant::now();
            scraped = self.scraper.scrape_top(&results, MAX_SCRAPED_SOURCES).await;
            for source in &scraped {
                let outcome = if source.fetch_error.is_some() {
                    "degraded"
                } else {
                    "ok"
                };
                self.metrics
                    .counter_inc("scrape.outcomes.total", &[("outcome", outcome)], 1);
            }
            self.generations
                .set_sources(&request.generation_id, &scraped)?;

            let tool = StreamFrame::ToolResult {
                tool_name: "read_pages".into(),
                result: serde_json::json!({
                    "scraped": scraped.iter().filter(|s| s.fetch_error.is_none()).count(),
                    "degraded": scraped.iter().filter(|s| s.fetch_error.is_some()).count(),
                }),
                duration_ms: stage_started.elapsed().as_millis() as u64,
            };
            frames.send(tool).await.map_err(|_| EngineError::Aborted)?;
            self.stage_done("scraping", stage_started);
            self.checkpoint(cancel)?;
        }

        let sources = source_refs(&results);
        if searched {
            let frame = StreamFrame::Metadata {
                sources: sources.clone(),
                context_references: request.references.clone(),
                confidence: plan.confidence,
                completeness: completeness(&scraped),
            };
            frames.send(frame).await.map_err(|_| EngineError::Aborted)?;
        }

        self.progress(frames, GenerationStage::Generating, "Writing the answer")
            .await?;
        let stage_started = Instant::now();
        let inputs = PromptInputs {
            context_summary: &plan.context_summary,
            results: &results,
            scraped: &scraped,
            history: &turns,
            latest_message: &request.message,
            references: &request.references,
            active_query: plan.queries.first().map(String::as_str),
        };
        let mut chat_request = ChatRequest::new(prompt::build_messages(&inputs));
        chat_request.max_tokens = Some(ANSWER_MAX_TOKENS);
        chat_request.temperature = Some(ANSWER_TEMPERATURE);

        let content = self
            .generator
            .generate(&chat_request, &results, cancel, frames)
            .await?;
        self.stage_done("generating", stage_started);

        Ok(RunReport { content, sources })
    }

    async fn progress(
        &self,
        frames: &mpsc::Sender<StreamFrame>,
        stage: GenerationStage,
        message: &str,
    ) -> Result<(), EngineError> {
        frames
            .send(StreamFrame::progress(stage, message))
            .await
            .map_err(|_| EngineError::Aborted)
    }

    fn checkpoint(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Aborted);
        }
        Ok(())
    }

    fn stage_done(&self, stage: &str, started: Instant) {
        self.metrics.histogram_observe(
            "stage.duration_ms",
            &[("stage", stage)],
            started.elapsed().as_secs_f64() * 1000.0,
        );
    }

    fn record_search(&self, generation_id: &GenerationId, outcome: &SearchOutcome) {
        for attempt in &outcome.attempts {
            let status = if attempt.error.is_some() {
                "error"
            } else if attempt.result_count > 0 {
                "hit"
            } else {
                "empty"
            };
            self.metrics.counter_inc(
                "search.attempts.total",
                &[("provider", attempt.provider), ("outcome", status)],
                1,
            );
            if let Some(reason) = &attempt.error {
                let detail = format!(
                    "search {} for \"{}\": {}",
                    attempt.provider, attempt.query, reason
                );
                if let Err(store_error) = self.generations.record_error(generation_id, &detail) {
                    warn!(error = %store_error, "failed to record search error");
                }
            }
        }
    }
}

fn source_refs(results: &[SearchResult]) -> Vec<SourceRef> {
    results
        .iter()
        .filter(|r| !r.is_fallback())
        .map(|r| SourceRef {
            title: r.title.clone(),
            url: r.url.clone(),
            domain: r.domain(),
        })
        .collect()
}

/// Fraction of sources whose page text actually came back.
fn completeness(scraped: &[ScrapedSource]) -> f32 {
    if scraped.is_empty() {
        return 0.0;
    }
    let ok = scraped.iter().filter(|s| s.fetch_error.is_none()).count();
    ok as f32 / scraped.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use curio_core::errors::ProviderError;
    use curio_llm::{MockChatProvider, MockResponse};
    use curio_scrape::GuardPolicy;
    use curio_search::{MockSearchProvider, SearchProvider};
    use curio_store::Database;

    use crate::plan_cache::PlanCache;

    const PLAN_SEARCH: &str =
        r#"{"should_search": true, "queries": ["rust async runtime"], "confidence": 0.9}"#;
    const PLAN_NO_SEARCH: &str =
        r#"{"should_search": false, "queries": [], "confidence": 0.9}"#;

    struct Fixture {
        runner: ResearchRunner,
        chat: Arc<MockChatProvider>,
        metrics: Arc<MetricsRecorder>,
        db: Database,
        request: RunRequest,
    }

    fn fixture(
        chat_responses: Vec<MockResponse>,
        search: Vec<Arc<MockSearchProvider>>,
    ) -> Fixture {
        let db = Database::in_memory().unwrap();
        let conversations = ConversationRepo::new(db.clone());
        let generations = GenerationRepo::new(db.clone());

        let conversation_id = ConversationId::new();
        let assistant_message_id = MessageId::new();
        conversations.ensure(&conversation_id).unwrap();
        conversations
            .append_turn(
                &conversation_id,
                &MessageId::new(),
                TurnRole::User,
                "Which async runtime should I pick for Rust?",
            )
            .unwrap();
        let generation = generations
            .create(&conversation_id, &assistant_message_id)
            .unwrap();
        let request = RunRequest {
            conversation_id,
            generation_id: generation.id,
            assistant_message_id,
            message: "Which async runtime should I pick for Rust?".into(),
            conversation_context: None,
            references: Vec::new(),
        };

        let chat = Arc::new(MockChatProvider::new(chat_responses));
        let metrics = Arc::new(MetricsRecorder::new());
        let planner = SearchPlanner::new(chat.clone(), Arc::new(PlanCache::new()));
        let executor = SearchExecutor::new(
            search
                .into_iter()
                .map(|p| p as Arc<dyn SearchProvider>)
                .collect(),
        );
        let scraper = Scraper::new(GuardPolicy::default());
        let generator = StreamingGenerator::new(chat.clone(), metrics.clone())
            .with_timing(Duration::from_millis(2), Duration::from_secs(5));
        let runner = ResearchRunner::new(
            planner,
            executor,
            scraper,
            generator,
            conversations,
            generations,
            metrics.clone(),
        );
        Fixture {
            runner,
            chat,
            metrics,
            db,
            request,
        }
    }

    // Private-range URLs keep the scraper off the network: the guard rejects
    // them and every source degrades to its snippet.
    fn private_hit(n: u8) -> SearchResult {
        SearchResult::normalized(
            format!("Source {n}"),
            format!("https://10.0.0.{n}/page"),
            "Tokio is the most widely used async runtime for Rust today.",
            0.9,
            "serper",
        )
        .unwrap()
    }

    async fn run_and_collect(fixture: &Fixture, cancel: CancellationToken) -> Vec<StreamFrame> {
        let (tx, mut rx) = mpsc::channel(256);
        fixture
            .runner
            .run(fixture.request.clone(), cancel, tx)
            .await;
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn kinds(frames: &[StreamFrame]) -> Vec<&'static str> {
        frames.iter().map(|f| f.frame_type()).collect()
    }

    fn stages(frames: &[StreamFrame]) -> Vec<GenerationStage> {
        frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Progress { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn full_pipeline_emits_ordered_frames() {
        let fixture = fixture(
            vec![
                MockResponse::stream_text(PLAN_SEARCH),
                MockResponse::chunked_text("Tokio is the usual choice. [10.0.0.1]", 8),
            ],
            vec![Arc::new(MockSearchProvider::with_results(
                "serper",
                vec![private_hit(1)],
            ))],
        );

        let frames = run_and_collect(&fixture, CancellationToken::new()).await;

        assert_eq!(
            stages(&frames),
            vec![
                GenerationStage::Planning,
                GenerationStage::Searching,
                GenerationStage::Scraping,
                GenerationStage::Generating,
            ]
        );
        let kind_list = kinds(&frames);
        assert!(kind_list.contains(&"tool_result"));
        assert!(kind_list.contains(&"metadata"));
        assert_eq!(*kind_list.last().unwrap(), "complete");

        let Some(StreamFrame::Complete {
            message_id,
            content,
            sources,
        }) = frames.last()
        else {
            panic!("expected a complete frame");
        };
        assert_eq!(*message_id, fixture.request.assistant_message_id);
        assert_eq!(content, "Tokio is the usual choice. [10.0.0.1]");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].domain.as_deref(), Some("10.0.0.1"));

        // The scraped (degraded) sources were persisted for export.
        let row = GenerationRepo::new(fixture.db.clone())
            .get(&fixture.request.generation_id)
            .unwrap();
        assert_eq!(row.sources.len(), 1);
        assert!(row.sources[0].fetch_error.is_some());
    }

    #[tokio::test]
    async fn no_search_plan_skips_search_and_scrape() {
        let search = Arc::new(MockSearchProvider::empty("serper"));
        let fixture = fixture(
            vec![
                MockResponse::stream_text(PLAN_NO_SEARCH),
                MockResponse::stream_text("Answering from the conversation."),
            ],
            vec![search.clone()],
        );

        let frames = run_and_collect(&fixture, CancellationToken::new()).await;

        assert_eq!(
            stages(&frames),
            vec![GenerationStage::Planning, GenerationStage::Generating]
        );
        assert!(!kinds(&frames).contains(&"metadata"));
        assert_eq!(*kinds(&frames).last().unwrap(), "complete");
        assert_eq!(search.call_count(), 0);
    }

    #[tokio::test]
    async fn search_failure_still_answers() {
        let fixture = fixture(
            vec![
                MockResponse::stream_text(PLAN_SEARCH),
                MockResponse::stream_text("Best effort answer without sources."),
            ],
            vec![Arc::new(MockSearchProvider::failing(
                "serper",
                curio_search::SearchError::HttpStatus { status: 503 },
            ))],
        );

        let frames = run_and_collect(&fixture, CancellationToken::new()).await;

        // Only the fallback placeholder came back, so scraping is skipped
        // but metadata still reports an empty source list.
        assert_eq!(
            stages(&frames),
            vec![
                GenerationStage::Planning,
                GenerationStage::Searching,
                GenerationStage::Generating,
            ]
        );
        let Some(StreamFrame::Metadata {
            sources,
            completeness,
            ..
        }) = frames
            .iter()
            .find(|f| matches!(f, StreamFrame::Metadata { .. }))
        else {
            panic!("expected a metadata frame");
        };
        assert!(sources.is_empty());
        assert_eq!(*completeness, 0.0);
        assert_eq!(*kinds(&frames).last().unwrap(), "complete");

        let row = GenerationRepo::new(fixture.db.clone())
            .get(&fixture.request.generation_id)
            .unwrap();
        assert_eq!(row.error_details.len(), 1);
        assert!(row.error_details[0].contains("serper"));
    }

    #[tokio::test]
    async fn generation_failure_ends_with_safe_error_frame() {
        let fixture = fixture(
            vec![
                MockResponse::stream_text(PLAN_NO_SEARCH),
                MockResponse::Error(ProviderError::AuthenticationFailed(
                    "key sk-secret rejected".into(),
                )),
            ],
            vec![Arc::new(MockSearchProvider::empty("serper"))],
        );

        let frames = run_and_collect(&fixture, CancellationToken::new()).await;

        let Some(StreamFrame::Error { error }) = frames.last() else {
            panic!("expected an error frame");
        };
        assert!(!error.contains("sk-secret"));
        assert_eq!(error, "The language model is currently unavailable.");

        // The raw detail lands in the generation's error record instead.
        let row = GenerationRepo::new(fixture.db.clone())
            .get(&fixture.request.generation_id)
            .unwrap();
        assert!(row
            .error_details
            .iter()
            .any(|detail| detail.contains("authentication failed")));
    }

    #[tokio::test]
    async fn model_refusal_with_results_synthesizes_and_completes() {
        let fixture = fixture(
            vec![
                MockResponse::stream_text(PLAN_SEARCH),
                MockResponse::Error(ProviderError::Overloaded),
            ],
            vec![Arc::new(MockSearchProvider::with_results(
                "serper",
                vec![private_hit(1)],
            ))],
        );

        let frames = run_and_collect(&fixture, CancellationToken::new()).await;

        let Some(StreamFrame::Complete { content, .. }) = frames.last() else {
            panic!("expected a complete frame");
        };
        assert!(content.contains("most widely used async runtime"));
        assert!(content.contains("[10.0.0.1]"));
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancellation() {
        let fixture = fixture(
            vec![MockResponse::stream_text(PLAN_NO_SEARCH)],
            vec![Arc::new(MockSearchProvider::empty("serper"))],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let frames = run_and_collect(&fixture, cancel).await;

        let Some(StreamFrame::Error { error }) = frames.last() else {
            panic!("expected an error frame");
        };
        assert_eq!(error, "The generation was cancelled.");
        // The planner ran; nothing after the first checkpoint did.
        assert_eq!(fixture.chat.call_count(), 1);
    }

    #[tokio::test]
    async fn live_message_stays_out_of_history() {
        let fixture = fixture(
            vec![
                MockResponse::stream_text(PLAN_NO_SEARCH),
                MockResponse::stream_text("Answer."),
            ],
            vec![Arc::new(MockSearchProvider::empty("serper"))],
        );

        run_and_collect(&fixture, CancellationToken::new()).await;

        let requests = fixture.chat.requests();
        assert_eq!(requests.len(), 2);
        // System message plus the latest user message, no duplicated history.
        let answer_request = &requests[1];
        assert_eq!(answer_request.messages.len(), 2);
        assert_eq!(
            answer_request.messages[1].content,
            fixture.request.message
        );
    }

    #[tokio::test]
    async fn metrics_track_the_run() {
        let fixture = fixture(
            vec![
                MockResponse::stream_text(PLAN_SEARCH),
                MockResponse::stream_text("Short answer."),
            ],
            vec![Arc::new(MockSearchProvider::with_results(
                "serper",
                vec![private_hit(1)],
            ))],
        );

        run_and_collect(&fixture, CancellationToken::new()).await;

        assert_eq!(fixture.metrics.gauge_get("generations.active", &[]), 0.0);
        assert_eq!(
            fixture.metrics.counter_get(
                "search.attempts.total",
                &[("provider", "serper"), ("outcome", "hit")]
            ),
            1
        );
        assert_eq!(
            fixture
                .metrics
                .counter_get("scrape.outcomes.total", &[("outcome", "degraded")]),
            1
        );
        let planning = fixture
            .metrics
            .histogram_summary("stage.duration_ms", &[("stage", "planning")]);
        assert_eq!(planning.count, 1);
    }
}
