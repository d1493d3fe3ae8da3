use std::collections::HashMap;

use curio_core::search::SearchResult;

const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "ref", "source"];

/// Canonical dedup key for a URL. Drops the scheme, `www.` prefix, fragment,
/// trailing slash, and tracking query parameters; remaining parameters are
/// sorted so ordering differences collapse.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let rest = rest.split('#').next().unwrap_or(rest);
    let (path_part, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    let (host_raw, path) = match path_part.find('/') {
        Some(i) => (&path_part[..i], &path_part[i..]),
        None => (path_part, ""),
    };
    let host_lc = host_raw
        .rsplit('@')
        .next()
        .unwrap_or(host_raw)
        .to_ascii_lowercase();
    let host = host_lc.strip_prefix("www.").unwrap_or(&host_lc);

    let mut path = path.to_string();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path == "/" {
        path.clear();
    }

    let mut kept: Vec<&str> = Vec::new();
    if let Some(q) = query {
        for pair in q.split('&') {
            if pair.is_empty() {
                continue;
            }
            let key = pair.split('=').next().unwrap_or(pair).to_ascii_lowercase();
            if key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str()) {
                continue;
            }
            kept.push(pair);
        }
        kept.sort_unstable();
    }

    if kept.is_empty() {
        format!("{host}{path}")
    } else {
        format!("{host}{path}?{}", kept.join("&"))
    }
}

/// Collapse duplicates by normalized URL. The earliest occurrence wins its
/// slot and ordering; a later duplicate only contributes its snippet when the
/// kept one is blank, and its score when higher.
pub fn dedup_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut kept: Vec<SearchResult> = Vec::with_capacity(results.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for result in results {
        let key = normalize_url(&result.url);
        match by_key.get(&key) {
            Some(&idx) => {
                let existing = &mut kept[idx];
                if existing.snippet.trim().is_empty() && !result.snippet.trim().is_empty() {
                    existing.snippet = result.snippet;
                }
                if result.relevance_score > existing.relevance_score {
                    existing.relevance_score = result.relevance_score;
                }
            }
            None => {
                by_key.insert(key, kept.len());
                kept.push(result);
            }
        }
    }
    kept
}
