use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use curio_engine::{PlanCache, ResearchRunner};
use curio_store::frames::FrameRepo;
use curio_store::Database;
use curio_telemetry::MetricsRecorder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::handlers;
use crate::orchestrator::GenerationOrchestrator;
use crate::origin::{origin_middleware, OriginGuard};
use crate::rate_limit::{
    rate_limit_middleware, start_sweep_task, RateLimiter, RATE_LIMIT_MAX_REQUESTS,
    RATE_LIMIT_WINDOW,
};
use crate::sign::PayloadSigner;

/// Ceiling for non-streaming endpoints. The SSE route manages its own pacing
/// with keep-alives and is exempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServerConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub signing_secret: Option<String>,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origins: Vec::new(),
            signing_secret: None,
            rate_limit_max_requests: RATE_LIMIT_MAX_REQUESTS,
            rate_limit_window: RATE_LIMIT_WINDOW,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = std::env::var("CURIO_PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.port);
        let allowed_origins = std::env::var("CURIO_ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(|entry| entry.trim().to_string())
                    .filter(|entry| !entry.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let signing_secret = std::env::var("CURIO_SIGNING_SECRET")
            .ok()
            .filter(|secret| !secret.is_empty());
        Self {
            port,
            allowed_origins,
            signing_secret,
            ..defaults
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub frames: Arc<FrameRepo>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub origin: Arc<OriginGuard>,
    pub limiter: Arc<RateLimiter>,
    pub signer: Option<Arc<PayloadSigner>>,
    pub metrics: Arc<MetricsRecorder>,
}

/// Routes with their middleware. The origin guard is outermost so rejected
/// origins never consume rate budget.
pub fn build_router(state: AppState) -> Router {
    let timed = Router::new()
        .route("/api/assist", post(handlers::trigger))
        .route("/api/assist/{generation_id}/export", get(handlers::export))
        .route("/health", get(handlers::health))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));
    let streaming = Router::new().route("/api/assist/{generation_id}/stream", get(handlers::stream));

    timed
        .merge(streaming)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), origin_middleware))
        .with_state(state)
}

pub struct ServerHandle {
    pub port: u16,
    pub orchestrator: Arc<GenerationOrchestrator>,
    _server: JoinHandle<()>,
    _sweep: JoinHandle<()>,
}

/// Binds the listener and serves in a background task. Port 0 picks a free
/// port; the bound one is on the returned handle.
pub async fn start(
    config: ServerConfig,
    db: Database,
    runner: Arc<ResearchRunner>,
    plan_cache: Arc<PlanCache>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let frames = Arc::new(FrameRepo::new(db.clone()));
    let orchestrator = Arc::new(GenerationOrchestrator::new(
        runner,
        plan_cache,
        frames.clone(),
        db.clone(),
    ));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_max_requests,
        config.rate_limit_window,
    ));
    let sweep = start_sweep_task(limiter.clone(), config.rate_limit_window);
    let state = AppState {
        db,
        frames,
        orchestrator: orchestrator.clone(),
        origin: Arc::new(OriginGuard::new(&config.allowed_origins)),
        limiter,
        signer: config.signing_secret.as_deref().map(|secret| Arc::new(PayloadSigner::new(secret))),
        metrics,
    };
    let router = build_router(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let port = listener.local_addr()?.port();
    info!(port, "curio server listening");

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            error!(error = %err, "server exited");
        }
    });

    Ok(ServerHandle {
        port,
        orchestrator,
        _server: server,
        _sweep: sweep,
    })
}
