use curio_core::search::SearchResult;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::provider::{position_score, SearchError, SearchProvider, SearchQuery};

pub const SERPER_SEARCH_URL: &str = "https://google.serper.dev/search";
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const DEFAULT_RESULT_COUNT: usize = 10;

/// Paid search backed by the Serper API.
#[derive(Debug)]
pub struct SerperProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    country: Option<String>,
    locale: Option<String>,
    location: Option<String>,
    default_results: usize,
}

impl SerperProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key: api_key.into(),
            endpoint: SERPER_SEARCH_URL.to_string(),
            country: None,
            locale: None,
            location: None,
            default_results: DEFAULT_RESULT_COUNT,
        }
    }

    /// Read configuration from `SERPER_*` environment variables.
    /// `SERPER_API_KEY` is required; everything else has a default.
    pub fn from_env() -> Result<Self, SearchError> {
        let api_key =
            env_opt("SERPER_API_KEY").ok_or(SearchError::NotConfigured("SERPER_API_KEY"))?;
        let mut provider = Self::new(api_key);
        if let Some(url) = env_opt("SERPER_SEARCH_URL") {
            provider.endpoint = url;
        }
        provider.country = env_opt("SERPER_COUNTRY");
        provider.locale = env_opt("SERPER_LOCALE");
        provider.location = env_opt("SERPER_LOCATION");
        if let Some(n) = env_opt("SERPER_N_RESULTS").and_then(|v| v.parse().ok()) {
            provider.default_results = n;
        }
        Ok(provider)
    }
}

#[async_trait::async_trait]
impl SearchProvider for SerperProvider {
    fn name(&self) -> &'static str {
        "serper"
    }

    #[instrument(skip(self, query), fields(provider = "serper"))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let num = query.max_results.unwrap_or(self.default_results);
        let mut params: Vec<(&str, String)> = vec![("num", num.to_string())];
        if let Some(gl) = &self.country {
            params.push(("gl", gl.clone()));
        }
        if let Some(hl) = &self.locale {
            params.push(("hl", hl.clone()));
        }
        if let Some(location) = &self.location {
            params.push(("location", location.clone()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(query.timeout())
            .header("X-API-KEY", &self.api_key)
            .query(&params)
            .json(&serde_json::json!({ "q": query.query }))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body: SerperResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;

        if let Some(error) = &body.error {
            debug!(%error, "serper answered with an error payload");
            return Ok(Vec::new());
        }
        Ok(results_from_body(body))
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Option<Vec<SerperOrganic>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    /// 1-based rank assigned by the API.
    #[serde(default)]
    position: Option<usize>,
}

fn results_from_body(body: SerperResponse) -> Vec<SearchResult> {
    body.organic
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let url = entry.link.filter(|l| !l.trim().is_empty())?;
            let index = entry.position.map(|p| p.saturating_sub(1)).unwrap_or(idx);
            SearchResult::normalized(
                entry.title.unwrap_or_default(),
                url,
                entry.snippet.unwrap_or_default(),
                position_score(index),
                "serper",
            )
        })
        .collect()
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
