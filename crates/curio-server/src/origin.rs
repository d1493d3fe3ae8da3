use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ORIGIN, VARY,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::error::ApiError;
use crate::server::AppState;

/// Origins always accepted so local frontends work without configuration.
pub const LOCAL_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://localhost:8000",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
    "http://127.0.0.1:8000",
];

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "content-type, last-event-id";

#[derive(Debug, PartialEq)]
pub enum OriginDecision {
    /// Origin present and on the list; echo it back in CORS headers.
    Allowed(String),
    /// No origin on a request that may omit one; no CORS headers emitted.
    AllowedWithoutOrigin,
    Rejected,
}

/// Allow-list of browser origins. Entries are exact origins
/// (`https://app.curio.dev`) or wildcard domains (`*.curio.dev`), which match
/// the bare domain and any subdomain over https.
pub struct OriginGuard {
    exact: Vec<String>,
    wildcards: Vec<String>,
}

impl OriginGuard {
    pub fn new(allowed: &[String]) -> Self {
        let mut exact: Vec<String> = LOCAL_DEV_ORIGINS.iter().map(|o| o.to_string()).collect();
        let mut wildcards = Vec::new();
        for entry in allowed {
            let entry = entry.trim().trim_end_matches('/').to_ascii_lowercase();
            if entry.is_empty() {
                continue;
            }
            match entry.strip_prefix("*.") {
                Some(domain) => wildcards.push(domain.to_string()),
                None => exact.push(entry),
            }
        }
        Self { exact, wildcards }
    }

    pub fn allows(&self, origin: &str) -> bool {
        let origin = origin.trim().trim_end_matches('/').to_ascii_lowercase();
        // Only web origins are ever acceptable. This also throws out
        // javascript: and data: schemes no matter what follows them.
        if !origin.starts_with("http://") && !origin.starts_with("https://") {
            return false;
        }
        if self.exact.iter().any(|allowed| *allowed == origin) {
            return true;
        }
        // Wildcards are https-only and never match a host carrying a port.
        let Some(host) = origin.strip_prefix("https://") else {
            return false;
        };
        if host.is_empty() || host.contains(':') || host.contains('/') {
            return false;
        }
        self.wildcards.iter().any(|domain| domain_matches(host, domain))
    }

    /// `origin_required` is set for state-changing requests, which must
    /// identify their origin; public reads may omit it.
    pub fn evaluate(&self, origin: Option<&str>, origin_required: bool) -> OriginDecision {
        match origin {
            Some(value) if self.allows(value) => OriginDecision::Allowed(value.to_string()),
            Some(_) => OriginDecision::Rejected,
            None if origin_required => OriginDecision::Rejected,
            None => OriginDecision::AllowedWithoutOrigin,
        }
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

fn origin_required(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD
}

fn rejected(origin: Option<&str>) -> Response {
    warn!(origin = origin.unwrap_or("<missing>"), "origin rejected");
    ApiError::Forbidden("origin not allowed").into_response()
}

fn apply_cors(response: &mut Response, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        response.headers_mut().append(VARY, HeaderValue::from_static("Origin"));
    }
}

fn preflight(origin: &str) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_cors(&mut response, origin);
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    response
}

/// Outermost middleware: requests from unlisted origins are turned away
/// before they reach rate limiting or a handler.
pub async fn origin_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if request.method() == Method::OPTIONS {
        return match state.origin.evaluate(origin.as_deref(), true) {
            OriginDecision::Allowed(allowed) => preflight(&allowed),
            _ => rejected(origin.as_deref()),
        };
    }

    let required = origin_required(request.method());
    match state.origin.evaluate(origin.as_deref(), required) {
        OriginDecision::Allowed(allowed) => {
            let mut response = next.run(request).await;
            apply_cors(&mut response, &allowed);
            response
        }
        OriginDecision::AllowedWithoutOrigin => next.run(request).await,
        OriginDecision::Rejected => rejected(origin.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(entries: &[&str]) -> OriginGuard {
        let owned: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
        OriginGuard::new(&owned)
    }

    #[test]
    fn exact_origin_allowed() {
        let guard = guard(&["https://app.curio.dev"]);
        assert!(guard.allows("https://app.curio.dev"));
        assert!(!guard.allows("https://other.curio.dev"));
    }

    #[test]
    fn wildcard_matches_bare_domain_and_subdomains() {
        let guard = guard(&["*.curio.dev"]);
        assert!(guard.allows("https://curio.dev"));
        assert!(guard.allows("https://docs.curio.dev"));
        assert!(guard.allows("https://a.b.curio.dev"));
    }

    #[test]
    fn wildcard_does_not_match_suffix_lookalikes() {
        let guard = guard(&["*.curio.dev"]);
        assert!(!guard.allows("https://evilcurio.dev"));
        assert!(!guard.allows("https://curio.dev.evil.com"));
    }

    #[test]
    fn wildcard_requires_https() {
        let guard = guard(&["*.curio.dev"]);
        assert!(!guard.allows("http://docs.curio.dev"));
        assert!(!guard.allows("https://docs.curio.dev:8443"));
    }

    #[test]
    fn javascript_scheme_always_rejected() {
        let guard = guard(&["*.curio.dev", "https://app.curio.dev"]);
        assert!(!guard.allows("javascript:alert(1)"));
        assert!(!guard.allows("javascript://docs.curio.dev"));
        assert!(!guard.allows("data:text/html,hi"));
    }

    #[test]
    fn local_dev_origins_always_allowed() {
        let guard = guard(&[]);
        assert!(guard.allows("http://localhost:3000"));
        assert!(guard.allows("http://127.0.0.1:5173"));
        assert!(!guard.allows("http://localhost:9999"));
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let guard = guard(&["*.curio.dev"]);
        assert!(guard.allows("HTTPS://Docs.Curio.DEV"));
    }

    #[test]
    fn missing_origin_depends_on_requirement() {
        let guard = guard(&[]);
        assert_eq!(guard.evaluate(None, true), OriginDecision::Rejected);
        assert_eq!(guard.evaluate(None, false), OriginDecision::AllowedWithoutOrigin);
    }

    #[test]
    fn present_but_unlisted_rejected_even_when_not_required() {
        let guard = guard(&[]);
        assert_eq!(guard.evaluate(Some("https://evil.dev"), false), OriginDecision::Rejected);
    }

    #[test]
    fn state_changing_methods_require_origin() {
        assert!(origin_required(&Method::POST));
        assert!(origin_required(&Method::DELETE));
        assert!(!origin_required(&Method::GET));
        assert!(!origin_required(&Method::HEAD));
    }
}
