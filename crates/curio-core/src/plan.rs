use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on search queries a single plan may carry.
pub const MAX_PLAN_QUERIES: usize = 3;

/// Decision produced by the search planner for one conversation state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub should_search: bool,
    pub queries: Vec<String>,
    pub confidence: f32,
    pub context_summary: String,
    pub fingerprint: u64,
    pub cached_at: DateTime<Utc>,
}

impl ResearchPlan {
    /// The safe default: answer from conversation context, no search.
    /// Returned whenever planning fails; planning failures never abort
    /// the pipeline.
    pub fn no_search(context_summary: String, fingerprint: u64, now: DateTime<Utc>) -> Self {
        Self {
            should_search: false,
            queries: Vec::new(),
            confidence: 0.0,
            context_summary,
            fingerprint,
            cached_at: now,
        }
    }

    /// Clamp queries to the allowed count and confidence into [0, 1].
    pub fn sanitized(mut self) -> Self {
        self.queries.truncate(MAX_PLAN_QUERIES);
        self.queries.retain(|q| !q.trim().is_empty());
        if !self.confidence.is_finite() {
            self.confidence = 0.0;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if self.queries.is_empty() {
            self.should_search = false;
        }
        self
    }
}

/// Pull the JSON payload out of model output that may wrap it in markdown
/// fences or surrounding prose. Returns the input trimmed if no block is found.
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    let object = trimmed
        .find('{')
        .and_then(|s| trimmed.rfind('}').map(|e| (s, e)));
    let array = trimmed
        .find('[')
        .and_then(|s| trimmed.rfind(']').map(|e| (s, e)));
    let span = match (object, array) {
        (Some(obj), Some(arr)) => {
            if arr.0 < obj.0 {
                Some(arr)
            } else {
                Some(obj)
            }
        }
        (obj, arr) => obj.or(arr),
    };
    match span {
        Some((start, end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}
