use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use curio_core::errors::ProviderError;
use curio_core::provider::{ChatProvider, ChatRequest, TokenStream};
use curio_core::stream::TokenEvent;

/// Chains a primary and secondary provider. The secondary only takes over if
/// the primary fails before producing any visible content: a request-level
/// error, a stream error ahead of the first content delta, or a stream that
/// completes empty. Once content has flowed, the stream is committed to the
/// primary and any later failure passes through unchanged.
pub struct FallbackProvider {
    primary: Arc<dyn ChatProvider>,
    secondary: Option<Arc<dyn ChatProvider>>,
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn ChatProvider>, secondary: Option<Arc<dyn ChatProvider>>) -> Self {
        Self { primary, secondary }
    }

    async fn attempt(
        provider: &dyn ChatProvider,
        request: &ChatRequest,
    ) -> Result<TokenStream, ProviderError> {
        let stream = provider.stream(request).await?;
        probe_first_content(stream).await
    }
}

/// Pull events off the stream until the first content delta. Start and
/// thinking events are buffered and replayed in front of the live stream
/// once committed; on failure before content, the buffer is discarded.
async fn probe_first_content(mut stream: TokenStream) -> Result<TokenStream, ProviderError> {
    let mut buffered: Vec<TokenEvent> = Vec::new();
    loop {
        match stream.next().await {
            Some(event @ TokenEvent::ContentDelta { .. }) => {
                buffered.push(event);
                return Ok(Box::pin(futures::stream::iter(buffered).chain(stream)));
            }
            Some(TokenEvent::Error { error }) => return Err(error),
            Some(TokenEvent::Done { .. }) => {
                return Err(ProviderError::MalformedResponse(
                    "stream completed without content".into(),
                ));
            }
            Some(event) => buffered.push(event),
            None => {
                return Err(ProviderError::StreamInterrupted(
                    "stream ended before content".into(),
                ));
            }
        }
    }
}

#[async_trait]
impl ChatProvider for FallbackProvider {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn model(&self) -> &str {
        self.primary.model()
    }

    async fn stream(&self, request: &ChatRequest) -> Result<TokenStream, ProviderError> {
        let primary_err = match Self::attempt(self.primary.as_ref(), request).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_err);
        };

        warn!(
            primary = self.primary.name(),
            secondary = secondary.name(),
            kind = primary_err.error_kind(),
            error = %primary_err,
            "primary provider failed before content, switching"
        );

        Self::attempt(secondary.as_ref(), request).await
    }
}
