use std::sync::Arc;

use curio_core::plan::extract_json_block;
use curio_core::provider::{ChatMessage, ChatProvider, ChatRequest};
use curio_core::search::SearchResult;
use curio_core::stream::TokenEvent;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::provider::{position_score, SearchError, SearchProvider, SearchQuery};

const RESULTS_SYSTEM_PROMPT: &str = "You are a web search engine. Given a query, \
respond with ONLY a JSON array of result objects, each with \"title\", \"url\", and \
\"snippet\" string fields. Use real, reachable http(s) URLs you are confident exist. \
No prose, no markdown, at most 8 entries. Respond with [] if you know nothing useful.";

/// Search answered by a chat model rather than a search API.
///
/// Sits between the paid and free providers in the chain: cheaper than the
/// paid API, usually better than nothing when it is down. The model's output
/// is parsed as a JSON array; anything unparseable counts as an empty answer
/// so the chain can keep moving.
pub struct ModelSearchProvider {
    chat: Arc<dyn ChatProvider>,
}

impl ModelSearchProvider {
    pub fn new(chat: Arc<dyn ChatProvider>) -> Self {
        Self { chat }
    }
}

#[async_trait::async_trait]
impl SearchProvider for ModelSearchProvider {
    fn name(&self) -> &'static str {
        "model"
    }

    #[instrument(skip(self, query), fields(provider = "model"))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let mut request = ChatRequest::new(vec![
            ChatMessage::system(RESULTS_SYSTEM_PROMPT),
            ChatMessage::user(&query.query),
        ]);
        request.max_tokens = Some(1024);
        request.temperature = Some(0.2);

        let mut stream = self
            .chat
            .stream(&request)
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                TokenEvent::ContentDelta { delta } => text.push_str(&delta),
                TokenEvent::Error { error } => {
                    return Err(SearchError::Request(error.to_string()));
                }
                _ => {}
            }
        }

        let max_results = query.max_results.unwrap_or(8);
        Ok(results_from_text(&text, max_results))
    }
}

#[derive(Debug, Deserialize)]
struct ModelResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

fn results_from_text(text: &str, max_results: usize) -> Vec<SearchResult> {
    let block = extract_json_block(text);
    let entries: Vec<ModelResult> = match serde_json::from_str(block) {
        Ok(entries) => entries,
        Err(error) => {
            debug!(%error, "model search output was not a JSON array");
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .take(max_results)
        .enumerate()
        .filter_map(|(idx, entry)| {
            let url = entry.url.filter(|u| {
                let u = u.trim();
                u.starts_with("http://") || u.starts_with("https://")
            })?;
            SearchResult::normalized(
                entry.title.unwrap_or_default(),
                url,
                entry.snippet.unwrap_or_default(),
                position_score(idx),
                "model",
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use curio_core::errors::ProviderError;
    use curio_llm::{MockChatProvider, MockResponse};

    fn provider_with(response: MockResponse) -> ModelSearchProvider {
        ModelSearchProvider::new(Arc::new(MockChatProvider::new(vec![response])))
    }

    #[tokio::test]
    async fn parses_json_array_from_stream() {
        let body = r#"[
            {"title": "Tokio", "url": "https://tokio.rs", "snippet": "async runtime"},
            {"title": "Bad", "url": "ftp://nope", "snippet": "skipped"},
            {"title": "Docs", "url": "https://docs.rs/tokio", "snippet": "docs"}
        ]"#;
        let provider = provider_with(MockResponse::stream_text(body));
        let results = provider
            .search(&SearchQuery::new("tokio runtime"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://tokio.rs");
        assert_eq!(results[1].url, "https://docs.rs/tokio");
        assert_eq!(results[0].provider, "model");
        assert!(results[0].relevance_score > results[1].relevance_score);
    }

    #[tokio::test]
    async fn fenced_output_is_accepted() {
        let body = "```json\n[{\"title\": \"A\", \"url\": \"https://a.com\", \"snippet\": \"s\"}]\n```";
        let provider = provider_with(MockResponse::stream_text(body));
        let results = provider.search(&SearchQuery::new("q")).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn unparseable_output_is_empty_not_error() {
        let provider = provider_with(MockResponse::stream_text("I could not find anything."));
        let results = provider.search(&SearchQuery::new("q")).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn provider_error_propagates() {
        let provider = provider_with(MockResponse::stream_error(ProviderError::Overloaded));
        let err = provider.search(&SearchQuery::new("q")).await.unwrap_err();
        assert!(matches!(err, SearchError::Request(_)));
    }

    #[tokio::test]
    async fn request_rejection_propagates() {
        let provider = provider_with(MockResponse::Error(ProviderError::AuthenticationFailed(
            "bad key".into(),
        )));
        let err = provider.search(&SearchQuery::new("q")).await.unwrap_err();
        assert!(matches!(err, SearchError::Request(_)));
    }

    #[tokio::test]
    async fn max_results_caps_entries() {
        let entries: Vec<String> = (0..12)
            .map(|i| format!(r#"{{"title": "t{i}", "url": "https://s{i}.com", "snippet": ""}}"#))
            .collect();
        let body = format!("[{}]", entries.join(","));
        let provider = provider_with(MockResponse::stream_text(&body));
        let mut query = SearchQuery::new("q");
        query.max_results = Some(4);
        let results = provider.search(&query).await.unwrap();
        assert_eq!(results.len(), 4);
    }
}
