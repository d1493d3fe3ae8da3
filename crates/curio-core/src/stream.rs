use crate::errors::ProviderError;

/// Events emitted while streaming a chat completion. Ordering contract:
///
/// Start → (ContentDelta | ThinkingDelta)* → Done
///
/// Error can appear at any point and ends the stream.
#[derive(Clone, Debug)]
pub enum TokenEvent {
    Start,
    ContentDelta { delta: String },
    ThinkingDelta { delta: String },
    Done { stop_reason: Option<String> },
    Error { error: ProviderError },
}

