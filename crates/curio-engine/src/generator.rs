use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use curio_core::frames::StreamFrame;
use curio_core::provider::{ChatProvider, ChatRequest};
use curio_core::search::SearchResult;
use curio_core::stream::TokenEvent;
use curio_telemetry::MetricsRecorder;

use crate::error::EngineError;

/// Cadence for batching content deltas into frames.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// How long the upstream stream may go silent before it is abandoned.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

const APOLOGY: &str = "\n\nSorry, I couldn't finish this answer.";

/// Streams the model's answer as content frames.
///
/// Deltas are batched: the first one goes out immediately, the rest on a
/// fixed cadence, and whatever remains when the stream ends. Every flushed
/// frame is final; the streamed text only ever grows.
pub struct StreamingGenerator {
    provider: Arc<dyn ChatProvider>,
    metrics: Arc<MetricsRecorder>,
    flush_interval: Duration,
    idle_timeout: Duration,
}

impl StreamingGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            provider,
            metrics,
            flush_interval: FLUSH_INTERVAL,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    /// Override the timing knobs. Test hook.
    pub fn with_timing(mut self, flush_interval: Duration, idle_timeout: Duration) -> Self {
        self.flush_interval = flush_interval;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Stream one answer into `frames`, returning the full streamed text.
    ///
    /// A provider that dies before producing anything gets replaced by a
    /// static answer synthesized from the search results; with no results to
    /// lean on, the failure comes back to the caller. A failure after text
    /// has been flushed keeps the partial answer, flushes a short apology,
    /// and fails.
    #[instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn generate(
        &self,
        request: &ChatRequest,
        results: &[SearchResult],
        cancel: &CancellationToken,
        frames: &mpsc::Sender<StreamFrame>,
    ) -> Result<String, EngineError> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Aborted),
            opened = self.provider.stream(request) => match opened {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(%error, "provider refused the stream");
                    return self.synthesize_from_snippets(results, error.into(), frames).await;
                }
            },
        };

        let mut content = String::new();
        let mut pending = String::new();
        let mut pending_thinking = String::new();
        let mut first_flush_done = false;
        let mut failure: Option<EngineError> = None;

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.flush(&mut pending, &mut pending_thinking, &mut content, frames).await?;
                    return Err(EngineError::Aborted);
                }
                _ = ticker.tick() => {
                    self.flush(&mut pending, &mut pending_thinking, &mut content, frames).await?;
                }
                _ = &mut idle => {
                    warn!(idle = ?self.idle_timeout, "stream went silent");
                    failure = Some(EngineError::StreamStalled(self.idle_timeout));
                    break;
                }
                event = stream.next() => {
                    idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    match event {
                        None | Some(TokenEvent::Done { .. }) => break,
                        Some(TokenEvent::Start) => {}
                        Some(TokenEvent::ContentDelta { delta }) => {
                            pending.push_str(&delta);
                            if !first_flush_done {
                                self.flush(&mut pending, &mut pending_thinking, &mut content, frames).await?;
                                first_flush_done = true;
                            }
                        }
                        Some(TokenEvent::ThinkingDelta { delta }) => {
                            pending_thinking.push_str(&delta);
                        }
                        Some(TokenEvent::Error { error }) => {
                            failure = Some(error.into());
                            break;
                        }
                    }
                }
            }
        }

        self.flush(&mut pending, &mut pending_thinking, &mut content, frames).await?;

        match failure {
            None => {
                info!(chars = content.chars().count(), "answer streamed");
                Ok(content)
            }
            Some(error) if content.is_empty() => {
                warn!(%error, "stream failed before the first token");
                self.synthesize_from_snippets(results, error, frames).await
            }
            Some(error) => {
                warn!(%error, flushed = content.chars().count(), "stream failed mid-answer");
                send(frames, StreamFrame::delta(APOLOGY)).await?;
                Err(error)
            }
        }
    }

    /// Flush buffered thinking and content. Content frames count toward the
    /// flush metric; an empty buffer sends nothing.
    async fn flush(
        &self,
        pending: &mut String,
        pending_thinking: &mut String,
        content: &mut String,
        frames: &mpsc::Sender<StreamFrame>,
    ) -> Result<(), EngineError> {
        if !pending_thinking.is_empty() {
            let thinking = std::mem::take(pending_thinking);
            send(frames, StreamFrame::Reasoning { content: thinking }).await?;
        }
        if !pending.is_empty() {
            let delta = std::mem::take(pending);
            content.push_str(&delta);
            send(frames, StreamFrame::delta(delta)).await?;
            self.metrics.counter_inc("stream.flushes.total", &[], 1);
        }
        Ok(())
    }

    /// Last resort when the model never produced a token: answer with the
    /// search snippets themselves, cited, as a single full-content frame.
    async fn synthesize_from_snippets(
        &self,
        results: &[SearchResult],
        error: EngineError,
        frames: &mpsc::Sender<StreamFrame>,
    ) -> Result<String, EngineError> {
        let usable: Vec<&SearchResult> = results
            .iter()
            .filter(|r| !r.is_fallback() && !r.snippet.trim().is_empty())
            .take(3)
            .collect();
        if usable.is_empty() {
            return Err(error);
        }

        warn!(%error, sources = usable.len(), "model unavailable, answering from search snippets");
        self.metrics.counter_inc("stream.snippet_fallbacks.total", &[], 1);

        let mut answer = String::from(
            "I couldn't reach the language model, so here is what the web search found:\n",
        );
        for result in &usable {
            let citation = result
                .domain()
                .map(|d| format!(" [{d}]"))
                .unwrap_or_default();
            answer.push_str(&format!(
                "\n- {}{}: {}",
                result.title,
                citation,
                result.snippet.trim()
            ));
        }

        send(frames, StreamFrame::full_content(answer.clone())).await?;
        Ok(answer)
    }
}

async fn send(frames: &mpsc::Sender<StreamFrame>, frame: StreamFrame) -> Result<(), EngineError> {
    frames.send(frame).await.map_err(|_| EngineError::Aborted)
}
