use std::cmp::Ordering;
use std::collections::HashSet;

use curio_core::search::{host_of, SearchResult};

/// How many results survive reranking and feed the synthesis prompt.
pub const MAX_RERANKED: usize = 7;

const OVERLAP_WEIGHT: f64 = 0.25;
const DOMAIN_BOOST: f64 = 0.15;
const LOW_SIGNAL_PENALTY: f64 = 0.2;

/// Re-score merged results against the user's question and keep the best.
///
/// Adjusted score = provider score + term-overlap bonus + domain boost
/// - low-signal penalty, clamped to [0, 1]. The sort is stable, so provider
/// ordering breaks ties.
pub fn rerank(results: Vec<SearchResult>, topic: &str, limit: usize) -> Vec<SearchResult> {
    let topic_terms = terms(topic);
    let mut scored: Vec<SearchResult> = results
        .into_iter()
        .map(|mut result| {
            if !result.is_fallback() {
                result.relevance_score = adjusted_score(&result, &topic_terms);
            }
            result
        })
        .collect();

    scored.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}

fn adjusted_score(result: &SearchResult, topic_terms: &HashSet<String>) -> f64 {
    let mut text_terms = terms(&result.title);
    text_terms.extend(terms(&result.snippet));

    let mut score = result.relevance_score + OVERLAP_WEIGHT * jaccard(topic_terms, &text_terms);
    if is_authoritative(&result.url) {
        score += DOMAIN_BOOST;
    }
    if is_low_signal(result) {
        score -= LOW_SIGNAL_PENALTY;
    }
    score.clamp(0.0, 1.0)
}

/// Lowercased alphanumeric terms of three or more characters.
fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn is_authoritative(url: &str) -> bool {
    match host_of(url) {
        Some(host) => {
            host.ends_with(".gov")
                || host.ends_with(".edu")
                || host == "wikipedia.org"
                || host.ends_with(".wikipedia.org")
        }
        None => false,
    }
}

fn is_low_signal(result: &SearchResult) -> bool {
    result.title.trim().is_empty() || result.snippet.trim().chars().count() < 40
}
