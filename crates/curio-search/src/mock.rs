use std::sync::atomic::{AtomicUsize, Ordering};

use curio_core::search::SearchResult;
use parking_lot::Mutex;

use crate::provider::{SearchError, SearchProvider, SearchQuery};

/// Scripted provider for tests. Responses are consumed in call order; once
/// exhausted the last one repeats, and an empty script always answers
/// `Ok(vec![])`.
pub struct MockSearchProvider {
    name: &'static str,
    responses: Vec<Result<Vec<SearchResult>, SearchError>>,
    call_count: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new(
        name: &'static str,
        responses: Vec<Result<Vec<SearchResult>, SearchError>>,
    ) -> Self {
        Self {
            name,
            responses,
            call_count: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with the same results.
    pub fn with_results(name: &'static str, results: Vec<SearchResult>) -> Self {
        Self::new(name, vec![Ok(results)])
    }

    /// Always answers with nothing.
    pub fn empty(name: &'static str) -> Self {
        Self::new(name, Vec::new())
    }

    /// Always fails with the given error.
    pub fn failing(name: &'static str, error: SearchError) -> Self {
        Self::new(name, vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Queries received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait::async_trait]
impl SearchProvider for MockSearchProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.query.clone());
        match self.responses.get(idx).or_else(|| self.responses.last()) {
            Some(response) => response.clone(),
            None => Ok(Vec::new()),
        }
    }
}
