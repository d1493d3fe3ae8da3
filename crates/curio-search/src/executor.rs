use std::sync::Arc;
use std::time::{Duration, Instant};

use curio_core::search::SearchResult;
use tracing::{info, instrument, warn};

use crate::dedup::dedup_results;
use crate::provider::{SearchError, SearchProvider, SearchQuery};
use crate::rerank::{rerank, MAX_RERANKED};

/// One provider call made while executing a plan's queries.
#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: &'static str,
    pub query: String,
    pub result_count: usize,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// What executing a search plan produced.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Deduped and reranked across all queries, at most [`MAX_RERANKED`].
    pub results: Vec<SearchResult>,
    pub attempts: Vec<ProviderAttempt>,
}

impl SearchOutcome {
    /// False when search produced nothing, or only the unavailable placeholder.
    pub fn has_real_results(&self) -> bool {
        self.results.iter().any(|r| !r.is_fallback())
    }
}

/// Runs each query through an ordered provider chain, first non-empty answer
/// wins. The chain order is paid API, then model-backed, then free.
pub struct SearchExecutor {
    providers: Vec<Arc<dyn SearchProvider>>,
    results_per_query: usize,
}

impl SearchExecutor {
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>) -> Self {
        Self {
            providers,
            results_per_query: 10,
        }
    }

    /// Execute the plan's queries against the chain. `topic` is the user's
    /// question, used to rerank the merged results.
    ///
    /// Never fails: when every attempt errors or comes back empty, the
    /// outcome holds the single unavailable placeholder instead.
    #[instrument(skip_all, fields(queries = queries.len(), providers = self.providers.len()))]
    pub async fn execute(&self, queries: &[String], topic: &str) -> SearchOutcome {
        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        let mut merged: Vec<SearchResult> = Vec::new();

        for query_text in queries {
            let mut query = SearchQuery::new(query_text.clone());
            query.max_results = Some(self.results_per_query);

            for provider in &self.providers {
                let started = Instant::now();
                let outcome = provider.search(&query).await;
                let attempt = record(provider.name(), query_text, &outcome, started.elapsed());
                let hit = attempt.result_count > 0;
                attempts.push(attempt);
                if hit {
                    if let Ok(results) = outcome {
                        merged.extend(results);
                    }
                    break;
                }
            }
        }

        let results = if merged.is_empty() {
            if attempts.is_empty() {
                Vec::new()
            } else {
                warn!("every search attempt failed or came back empty");
                vec![SearchResult::unavailable_fallback()]
            }
        } else {
            rerank(dedup_results(merged), topic, MAX_RERANKED)
        };

        info!(
            results = results.len(),
            attempts = attempts.len(),
            "search plan executed"
        );
        SearchOutcome { results, attempts }
    }
}

fn record(
    provider: &'static str,
    query: &str,
    outcome: &Result<Vec<SearchResult>, SearchError>,
    elapsed: Duration,
) -> ProviderAttempt {
    match outcome {
        Ok(results) => {
            if !results.is_empty() {
                info!(provider, results = results.len(), "search hit");
            }
            ProviderAttempt {
                provider,
                query: query.to_string(),
                result_count: results.len(),
                error: None,
                elapsed,
            }
        }
        Err(error) => {
            warn!(provider, %error, "search attempt failed");
            ProviderAttempt {
                provider,
                query: query.to_string(),
                result_count: 0,
                error: Some(error.to_string()),
                elapsed,
            }
        }
    }
}
