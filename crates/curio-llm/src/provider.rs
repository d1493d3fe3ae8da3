use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::instrument;

use curio_core::errors::ProviderError;
use curio_core::provider::{ChatMessage, ChatProvider, ChatRequest, TokenStream};
use curio_core::stream::TokenEvent;

use crate::ratelimit;
use crate::sse::{self, SseParser};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Streaming chat provider for any OpenAI-compatible completions endpoint.
/// OpenAI and Groq are both served by this type with different base URLs.
pub struct OpenAiProvider {
    client: Client,
    name: String,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            name: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Build the OpenAI provider from OPENAI_API_KEY, with optional
    /// OPENAI_BASE_URL and OPENAI_MODEL overrides.
    pub fn openai_from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::NotConfigured("OPENAI_API_KEY"))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_BASE_URL.to_string());
        let model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string());
        Ok(Self::new("openai", SecretString::from(api_key), base_url, model))
    }

    /// Build the Groq provider from GROQ_API_KEY, with an optional
    /// GROQ_MODEL override.
    pub fn groq_from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("GROQ_API_KEY")
            .map_err(|_| ProviderError::NotConfigured("GROQ_API_KEY"))?;
        let model = std::env::var("GROQ_MODEL").unwrap_or_else(|_| DEFAULT_GROQ_MODEL.to_string());
        Ok(Self::new("groq", SecretString::from(api_key), GROQ_BASE_URL, model))
    }

    fn build_request(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .json(&body)
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(provider = %self.name, model = %self.model))]
    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream, ProviderError> {
        let resp = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = ratelimit::parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(ratelimit::classify_status(status, retry_after, body));
        }

        let byte_stream = resp.bytes_stream();
        Ok(Box::pin(SseStream::new(byte_stream)))
    }
}

/// Wraps a byte stream from reqwest and yields TokenEvents.
/// Emits an error if no data arrives within the idle timeout.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: String,
    pending: Vec<TokenEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    ended: bool,
}

impl SseStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: String::new(),
            pending: Vec::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            ended: false,
        }
    }
}

impl Stream for SseStream {
    type Item = TokenEvent;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        // Return pending events first
        if !self.pending.is_empty() {
            return std::task::Poll::Ready(Some(self.pending.remove(0)));
        }
        if self.ended {
            return std::task::Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    // Data arrived, push the idle deadline out
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    self.buffer.push_str(&text);

                    // Process complete SSE events from the buffer
                    while let Some(pos) = self.buffer.find("\n\n") {
                        let chunk = self.buffer[..pos + 2].to_string();
                        self.buffer = self.buffer[pos + 2..].to_string();

                        for data in sse::parse_sse_data(&chunk) {
                            let events = self.parser.parse_data(&data);
                            self.pending.extend(events);
                        }
                    }

                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    self.ended = true;
                    return std::task::Poll::Ready(Some(TokenEvent::Error {
                        error: ProviderError::StreamInterrupted(e.to_string()),
                    }));
                }
                std::task::Poll::Ready(None) => {
                    self.ended = true;
                    // Drain whatever is left in the buffer
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        for data in sse::parse_sse_data(&remaining) {
                            let events = self.parser.parse_data(&data);
                            self.pending.extend(events);
                        }
                    }
                    // A close without a finish chunk is an interruption
                    if !self.parser.finished() {
                        self.pending.push(TokenEvent::Error {
                            error: ProviderError::StreamInterrupted(
                                "connection closed before completion".into(),
                            ),
                        });
                    }
                    if !self.pending.is_empty() {
                        return std::task::Poll::Ready(Some(self.pending.remove(0)));
                    }
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => {
                    // Nothing ready; check the idle deadline
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.ended = true;
                        return std::task::Poll::Ready(Some(TokenEvent::Error {
                            error: ProviderError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}
