use std::time::Duration;

use reqwest::header::HeaderMap;

use curio_core::errors::ProviderError;

/// Parse a reset-time string like "2m59.56s", "59.56s", "2m" or "250ms"
/// into a duration. Groq and OpenAI both report rate limit resets in this
/// compound format.
pub fn parse_compound_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| Duration::from_secs_f64(v / 1000.0));
    }

    let mut total = 0.0f64;
    let mut rest = s;
    if let Some((minutes, tail)) = rest.split_once('m') {
        let Ok(m) = minutes.parse::<f64>() else {
            return None;
        };
        total += m * 60.0;
        rest = tail;
    }
    if let Some(seconds) = rest.strip_suffix('s') {
        let Ok(v) = seconds.parse::<f64>() else {
            return None;
        };
        total += v;
    } else if !rest.is_empty() {
        // Bare number of seconds
        let Ok(v) = rest.parse::<f64>() else {
            return None;
        };
        total += v;
    }

    if total.is_finite() && total > 0.0 {
        Some(Duration::from_secs_f64(total))
    } else {
        None
    }
}

/// Extract a retry hint from response headers.
///
/// Checks `retry-after` first (integer seconds or compound form), then the
/// `x-ratelimit-reset-requests` / `x-ratelimit-reset-tokens` pair.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(value) = header_str(headers, "retry-after") {
        if let Ok(secs) = value.trim().parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Some(d) = parse_compound_duration(value) {
            return Some(d);
        }
    }

    for name in ["x-ratelimit-reset-requests", "x-ratelimit-reset-tokens"] {
        if let Some(d) = header_str(headers, name).and_then(parse_compound_duration) {
            return Some(d);
        }
    }

    None
}

/// Map a non-success HTTP response to a provider error, enriching 429s with
/// the parsed retry hint.
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited { retry_after },
        _ => ProviderError::from_status(status, body),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
