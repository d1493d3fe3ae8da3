use serde::Deserialize;

use curio_core::errors::ProviderError;
use curio_core::stream::TokenEvent;

/// State machine for parsing an OpenAI-compatible chat completions stream.
///
/// Chunks arrive as `data: {json}` lines with a final `data: [DONE]`
/// sentinel. Groq serves the same wire format, including reasoning deltas
/// for models that expose them.
pub struct SseParser {
    started: bool,
    finished: bool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            started: false,
            finished: false,
        }
    }

    /// Parse a single `data:` payload and return zero or more TokenEvents.
    pub fn parse_data(&mut self, data: &str) -> Vec<TokenEvent> {
        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }

        if data == "[DONE]" {
            if self.finished {
                return Vec::new();
            }
            self.finished = true;
            return vec![TokenEvent::Done { stop_reason: None }];
        }

        let mut events = Vec::new();

        if let Ok(err) = serde_json::from_str::<ErrorEvent>(data) {
            events.push(TokenEvent::Error {
                error: classify_error(&err),
            });
            return events;
        }

        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data) else {
            return events;
        };
        // Usage-only chunks carry no choices
        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if !self.started {
            self.started = true;
            events.push(TokenEvent::Start);
        }

        if let Some(reasoning) = choice.delta.reasoning() {
            if !reasoning.is_empty() {
                events.push(TokenEvent::ThinkingDelta {
                    delta: reasoning.to_string(),
                });
            }
        }

        if let Some(text) = choice.delta.content.as_deref() {
            if !text.is_empty() {
                events.push(TokenEvent::ContentDelta {
                    delta: text.to_string(),
                });
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finished = true;
            events.push(TokenEvent::Done {
                stop_reason: Some(reason),
            });
        }

        events
    }

    /// Whether a terminal chunk (finish_reason or [DONE]) has been seen.
    pub fn finished(&self) -> bool {
        self.finished
    }
}

fn classify_error(err: &ErrorEvent) -> ProviderError {
    let kind = err
        .error
        .error_type
        .as_deref()
        .or(err.error.code.as_deref())
        .unwrap_or("");
    if kind.contains("rate_limit") {
        ProviderError::RateLimited { retry_after: None }
    } else if kind.contains("authentication") || kind.contains("invalid_api_key") {
        ProviderError::AuthenticationFailed(err.error.message.clone())
    } else if kind == "invalid_request_error" {
        ProviderError::InvalidRequest(err.error.message.clone())
    } else {
        ProviderError::ServerError {
            status: 500,
            body: err.error.message.clone(),
        }
    }
}

/// Extract `data:` payloads from raw SSE text.
pub fn parse_sse_data(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix("data:") {
            payloads.push(data.trim_start().to_string());
        }
    }
    payloads
}

// --- Deserialization types for chat completion chunks ---

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    // Groq reasoning models use reasoning_content, some gateways use reasoning
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl ChunkDelta {
    fn reasoning(&self) -> Option<&str> {
        self.reasoning_content.as_deref().or(self.reasoning.as_deref())
    }
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_text_stream() {
        let mut parser = SseParser::new();

        // Role-only first chunk emits Start and nothing else
        let events = parser.parse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TokenEvent::Start));

        let events = parser.parse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TokenEvent::ContentDelta { delta } if delta == "Hello"));

        let events = parser.parse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":" world!"},"finish_reason":null}]}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TokenEvent::ContentDelta { delta } if delta == " world!"));

        // Finish chunk carries the stop reason
        let events = parser.parse_data(
            r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(
            matches!(&events[0], TokenEvent::Done { stop_reason: Some(r) } if r == "stop")
        );
        assert!(parser.finished());

        // [DONE] after a finish chunk is a no-op
        let events = parser.parse_data("[DONE]");
        assert!(events.is_empty());
    }

    #[test]
    fn done_sentinel_without_finish_chunk() {
        let mut parser = SseParser::new();
        parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"content":"hi"},"finish_reason":null}]}"#,
        );
        let events = parser.parse_data("[DONE]");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TokenEvent::Done { stop_reason: None }));
        assert!(parser.finished());
    }

    #[test]
    fn reasoning_deltas_mapped_to_thinking() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"reasoning_content":"Let me check."},"finish_reason":null}]}"#,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TokenEvent::Start));
        assert!(
            matches!(&events[1], TokenEvent::ThinkingDelta { delta } if delta == "Let me check.")
        );
        // Reasoning must never surface as a content delta
        assert!(!events
            .iter()
            .any(|e| matches!(e, TokenEvent::ContentDelta { .. })));
    }

    #[test]
    fn reasoning_field_variant() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"reasoning":"hmm"},"finish_reason":null}]}"#,
        );
        assert!(matches!(&events[1], TokenEvent::ThinkingDelta { delta } if delta == "hmm"));
    }

    #[test]
    fn parse_rate_limit_error() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(
            r#"{"error":{"message":"Rate limit reached","type":"rate_limit_exceeded"}}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TokenEvent::Error { error: ProviderError::RateLimited { .. } }
        ));
    }

    #[test]
    fn parse_auth_error() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(
            r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#,
        );
        assert!(matches!(
            &events[0],
            TokenEvent::Error { error } if error.is_fatal()
        ));
    }

    #[test]
    fn usage_only_chunk_ignored() {
        let mut parser = SseParser::new();
        let events =
            parser.parse_data(r#"{"id":"chatcmpl-1","choices":[],"usage":{"total_tokens":42}}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_chunk_ignored() {
        let mut parser = SseParser::new();
        let events = parser.parse_data("not json at all");
        assert!(events.is_empty());
    }

    #[test]
    fn parse_sse_data_basic() {
        let raw = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n";
        let payloads = parse_sse_data(raw);
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0], r#"{"a":1}"#);
        assert_eq!(payloads[2], "[DONE]");
    }

    #[test]
    fn parse_sse_data_without_space() {
        let payloads = parse_sse_data("data:[DONE]\n");
        assert_eq!(payloads, vec!["[DONE]".to_string()]);
    }

    #[test]
    fn parse_sse_data_skips_comments_and_blanks() {
        let raw = ": keep-alive\n\ndata: {\"x\":1}\n\n";
        let payloads = parse_sse_data(raw);
        assert_eq!(payloads.len(), 1);
    }

    #[test]
    fn content_and_finish_in_same_chunk() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"content":"bye"},"finish_reason":"stop"}]}"#,
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TokenEvent::Start));
        assert!(matches!(&events[1], TokenEvent::ContentDelta { delta } if delta == "bye"));
        assert!(matches!(&events[2], TokenEvent::Done { .. }));
    }
}
