pub mod bridge;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod origin;
pub mod rate_limit;
pub mod server;
pub mod sign;

pub use error::ApiError;
pub use orchestrator::{ActiveGeneration, GenerationOrchestrator, TriggerReceipt, FRAME_CHANNEL_CAPACITY};
pub use origin::{OriginGuard, LOCAL_DEV_ORIGINS};
pub use rate_limit::{RateLimiter, RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use sign::{PayloadSigner, SignedPayload};
