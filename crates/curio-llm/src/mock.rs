use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use curio_core::errors::ProviderError;
use curio_core::provider::{ChatProvider, ChatRequest, TokenStream};
use curio_core::stream::TokenEvent;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of TokenEvents.
    Stream(Vec<TokenEvent>),
    /// Return an error from the stream() call itself.
    Error(ProviderError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// Convenience: create a simple text response stream.
    pub fn stream_text(text: &str) -> Self {
        Self::Stream(vec![
            TokenEvent::Start,
            TokenEvent::ContentDelta {
                delta: text.to_string(),
            },
            TokenEvent::Done {
                stop_reason: Some("stop".into()),
            },
        ])
    }

    /// Convenience: a text response split into fixed-size character chunks.
    pub fn chunked_text(text: &str, chunk_chars: usize) -> Self {
        let mut events = vec![TokenEvent::Start];
        let chars: Vec<char> = text.chars().collect();
        for piece in chars.chunks(chunk_chars.max(1)) {
            events.push(TokenEvent::ContentDelta {
                delta: piece.iter().collect(),
            });
        }
        events.push(TokenEvent::Done {
            stop_reason: Some("stop".into()),
        });
        Self::Stream(events)
    }

    /// Convenience: create a stream that ends with an error event.
    pub fn stream_error(error: ProviderError) -> Self {
        Self::Stream(vec![TokenEvent::Start, TokenEvent::Error { error }])
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
pub struct MockChatProvider {
    name: String,
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            name: "mock".into(),
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests the provider has received, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(response) = self.responses.get(idx) else {
            return Err(ProviderError::InvalidRequest(format!(
                "MockChatProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: &MockResponse) -> Result<TokenStream, ProviderError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => {
                let events = events.clone();
                return Ok(Box::pin(stream::iter(events)));
            }
            MockResponse::Error(e) => return Err(e.clone()),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(*duration).await;
                current = inner;
            }
        }
    }
}
