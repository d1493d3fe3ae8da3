use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::ApiError;
use crate::server::AppState;

pub const RATE_LIMIT_MAX_REQUESTS: u32 = 20;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy)]
struct Bucket {
    window_started: Instant,
    count: u32,
}

#[derive(Debug, PartialEq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Fixed-window request counter keyed by client IP and route group.
pub struct RateLimiter {
    buckets: DashMap<(IpAddr, &'static str), Bucket>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Counts one request. The caller supplies `now` so windows are
    /// deterministic under test.
    pub fn check(&self, ip: IpAddr, route: &'static str, now: Instant) -> RateDecision {
        let mut entry = self.buckets.entry((ip, route)).or_insert(Bucket {
            window_started: now,
            count: 0,
        });
        let bucket = entry.value_mut();
        if now.duration_since(bucket.window_started) >= self.window {
            bucket.window_started = now;
            bucket.count = 0;
        }
        if bucket.count < self.max_requests {
            bucket.count += 1;
            return RateDecision::Allowed;
        }
        let elapsed = now.duration_since(bucket.window_started);
        let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
        RateDecision::Limited { retry_after_secs }
    }

    /// Drops buckets whose window has fully elapsed.
    pub fn sweep(&self, now: Instant) {
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_started) < self.window);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Resolves the client address: first hop of `X-Forwarded-For` when a proxy
/// supplied one, otherwise the socket peer.
pub fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    forwarded
        .or_else(|| socket.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Buckets are per route group, not per path, so each generation's stream
/// and export URLs share one budget.
fn route_key(path: &str) -> &'static str {
    if path == "/api/assist" {
        "trigger"
    } else if path.ends_with("/stream") {
        "stream"
    } else if path.ends_with("/export") {
        "export"
    } else {
        "other"
    }
}

pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    // Health stays reachable for probes even from a noisy host.
    if path == "/health" {
        return next.run(request).await;
    }
    let route = route_key(path);
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), socket);
    match state.limiter.check(ip, route, Instant::now()) {
        RateDecision::Allowed => next.run(request).await,
        RateDecision::Limited { retry_after_secs } => {
            state.metrics.counter_inc("http.rate_limited.total", &[("route", route)], 1);
            warn!(%ip, route, retry_after_secs, "rate limit exceeded");
            ApiError::RateLimited {
                retry_after: retry_after_secs,
            }
            .into_response()
        }
    }
}

pub fn start_sweep_task(limiter: Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            limiter.sweep(Instant::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.check(ip(1), "trigger", now), RateDecision::Allowed);
        }
        let decision = limiter.check(ip(1), "trigger", now);
        assert!(matches!(decision, RateDecision::Limited { retry_after_secs } if retry_after_secs >= 1));
    }

    #[test]
    fn window_elapse_resets_the_count() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert_eq!(limiter.check(ip(1), "trigger", start), RateDecision::Allowed);
        assert!(matches!(
            limiter.check(ip(1), "trigger", start),
            RateDecision::Limited { .. }
        ));
        let later = start + Duration::from_secs(61);
        assert_eq!(limiter.check(ip(1), "trigger", later), RateDecision::Allowed);
    }

    #[test]
    fn retry_after_never_reports_zero() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        limiter.check(ip(1), "trigger", start);
        // Right at the end of the window the remainder rounds down to zero.
        let decision = limiter.check(ip(1), "trigger", start + Duration::from_millis(59_900));
        assert_eq!(decision, RateDecision::Limited { retry_after_secs: 1 });
    }

    #[test]
    fn routes_and_ips_have_separate_budgets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.check(ip(1), "trigger", now), RateDecision::Allowed);
        assert_eq!(limiter.check(ip(1), "stream", now), RateDecision::Allowed);
        assert_eq!(limiter.check(ip(2), "trigger", now), RateDecision::Allowed);
        assert!(matches!(
            limiter.check(ip(1), "trigger", now),
            RateDecision::Limited { .. }
        ));
    }

    #[test]
    fn sweep_evicts_expired_buckets() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        limiter.check(ip(1), "trigger", start);
        limiter.check(ip(2), "export", start);
        assert_eq!(limiter.len(), 2);
        limiter.sweep(start + Duration::from_secs(61));
        assert!(limiter.is_empty());
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let socket: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(socket)),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn client_ip_falls_back_to_socket_on_garbage_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        let socket: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(socket)), "192.0.2.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn client_ip_defaults_to_unspecified() {
        assert_eq!(
            client_ip(&HeaderMap::new(), None),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );
    }

    #[test]
    fn route_keys_group_generation_scoped_paths() {
        assert_eq!(route_key("/api/assist"), "trigger");
        assert_eq!(route_key("/api/assist/abc/stream"), "stream");
        assert_eq!(route_key("/api/assist/abc/export"), "export");
        assert_eq!(route_key("/somewhere"), "other");
    }
}
