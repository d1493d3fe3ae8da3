use serde::{Deserialize, Serialize};

/// Maximum number of sources scraped per generation.
pub const MAX_SCRAPED_SOURCES: usize = 3;

/// One web search hit after normalization.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Always within [0.0, 1.0] after normalization.
    pub relevance_score: f64,
    pub provider: &'static str,
}

impl SearchResult {
    /// Build a result, normalizing the score. Returns `None` when the score
    /// is not a finite number; such results are dropped, not zeroed.
    pub fn normalized(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        score: f64,
        provider: &'static str,
    ) -> Option<Self> {
        if !score.is_finite() {
            return None;
        }
        Some(Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            relevance_score: score.clamp(0.0, 1.0),
            provider,
        })
    }

    /// Placeholder emitted when every provider failed for every query.
    pub fn unavailable_fallback() -> Self {
        Self {
            title: "Search results unavailable".into(),
            url: "https://example.com".into(),
            snippet: "Live search could not be reached; answering from conversation context only."
                .into(),
            relevance_score: 0.0,
            provider: "fallback",
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.provider == "fallback"
    }

    /// Registrable host of the result URL, for citation labels.
    pub fn domain(&self) -> Option<String> {
        host_of(&self.url)
    }
}

/// One scraped page, or its degraded snippet stand-in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapedSource {
    pub url: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

impl ScrapedSource {
    /// Degrade to the search snippet when the page could not be scraped.
    pub fn degraded(result: &SearchResult, error: impl Into<String>) -> Self {
        Self {
            url: result.url.clone(),
            title: result.title.clone(),
            content: result.snippet.clone(),
            summary: result.snippet.clone(),
            fetch_error: Some(error.into()),
        }
    }

    pub fn domain(&self) -> Option<String> {
        host_of(&self.url)
    }
}

/// Lowercased host with any `www.` prefix stripped, or None for unparseable URLs.
pub fn host_of(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    let host = rest
        .split(['/', '?', '#'])
        .next()?
        .split('@')
        .next_back()?
        .split(':')
        .next()?
        .to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}
