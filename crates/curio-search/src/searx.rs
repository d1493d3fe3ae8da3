use curio_core::search::SearchResult;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::provider::{position_score, SearchError, SearchProvider, SearchQuery};

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Free search against one or more SearXNG instances.
///
/// With multiple endpoints configured, queries are sharded deterministically
/// by a stable hash of the query text, so repeats hit the same instance.
pub struct SearxProvider {
    client: Client,
    endpoints: Vec<String>,
}

impl SearxProvider {
    pub fn new(endpoints: Vec<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self { client, endpoints }
    }

    /// Read `SEARXNG_ENDPOINTS` (comma or whitespace separated) plus the
    /// single-endpoint `SEARXNG_ENDPOINT` fallback.
    pub fn from_env() -> Result<Self, SearchError> {
        let endpoints = endpoints_from_env();
        if endpoints.is_empty() {
            return Err(SearchError::NotConfigured("SEARXNG_ENDPOINT"));
        }
        Ok(Self::new(endpoints))
    }

    fn endpoint_search_for(base: &str) -> String {
        // Accept either a base URL or a full /search endpoint.
        let mut base = base.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    fn pick_endpoint(&self, query: &SearchQuery) -> &str {
        let idx = (stable_hash64(&query.query) as usize) % self.endpoints.len().max(1);
        self.endpoints.get(idx).map(String::as_str).unwrap_or("")
    }
}

/// FNV-1a over the query bytes. Stable across runs, unlike `HashMap`'s
/// `RandomState`.
fn stable_hash64(text: &str) -> u64 {
    let mut h: u64 = 14695981039346656037;
    for b in text.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

fn endpoints_from_env() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Ok(v) = std::env::var("SEARXNG_ENDPOINTS") {
        for raw in v.split(|c: char| c == ',' || c.is_whitespace()) {
            let s = raw.trim();
            if s.is_empty() {
                continue;
            }
            let s = s.to_string();
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }
    if let Ok(v) = std::env::var("SEARXNG_ENDPOINT") {
        let s = v.trim().to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

#[async_trait::async_trait]
impl SearchProvider for SearxProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    #[instrument(skip(self, query), fields(provider = "searxng"))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let endpoint = Self::endpoint_search_for(self.pick_endpoint(query));
        let max_results = query.max_results.unwrap_or(10).min(20);

        let response = self
            .client
            .get(endpoint)
            .query(&[("q", query.query.as_str()), ("format", "json")])
            .timeout(query.timeout())
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let parsed: SearxResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;

        Ok(results_from_body(parsed, max_results))
    }
}

#[derive(Debug, Deserialize)]
struct SearxResponse {
    results: Option<Vec<SearxResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG carries snippets in `content` in its JSON format.
    content: Option<String>,
}

fn results_from_body(body: SearxResponse, max_results: usize) -> Vec<SearchResult> {
    body.results
        .unwrap_or_default()
        .into_iter()
        .take(max_results)
        .enumerate()
        .filter_map(|(idx, entry)| {
            let url = entry.url.filter(|u| !u.trim().is_empty())?;
            SearchResult::normalized(
                entry.title.unwrap_or_default(),
                url,
                entry.content.unwrap_or_default(),
                position_score(idx),
                "searxng",
            )
        })
        .collect()
}
