use async_trait::async_trait;
use curio_core::search::SearchResult;

/// Default per-request timeout when the query does not carry one.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// A single search request as seen by a provider.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    /// Soft cap on returned results. Providers may return fewer.
    pub max_results: Option<usize>,
    /// Request timeout in milliseconds, clamped to [1s, 60s].
    pub timeout_ms: Option<u64>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: None,
            timeout_ms: None,
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        let ms = self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).clamp(1_000, 60_000);
        std::time::Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("search provider not configured: missing {0}")]
    NotConfigured(&'static str),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("search provider returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("search response malformed: {0}")]
    Malformed(String),
}

/// One backend capable of answering a web search query.
///
/// Implementations return `Ok(vec![])` when the backend answered but had
/// nothing useful; the executor treats that as a miss and moves to the next
/// provider in the chain.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError>;
}

/// Relevance score derived from a 0-based result position. Linearly decays
/// from 1.0 with a 0.1 floor so late results still count for something.
pub fn position_score(index: usize) -> f64 {
    (1.0 - 0.05 * index as f64).max(0.1)
}
