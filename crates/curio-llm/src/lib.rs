mod fallback;
mod mock;
mod provider;
mod ratelimit;
mod reliable;
mod sse;

pub use fallback::FallbackProvider;
pub use mock::{MockChatProvider, MockResponse};
pub use provider::OpenAiProvider;
pub use ratelimit::{classify_status, parse_compound_duration, parse_retry_after};
pub use reliable::{ReliableConfig, ReliableProvider};
pub use sse::{parse_sse_data, SseParser};
