//! The research pipeline.
//!
//! A [`ResearchRunner`] takes one triggered generation end to end: a
//! [`SearchPlanner`] decides whether the web is needed and with which
//! queries, the search and scrape crates collect material, and a
//! [`StreamingGenerator`] turns prompt plus material into a token stream.
//! Every observable step leaves the runner as a frame on an ordered channel;
//! persistence of those frames is the consumer's job. The runner itself only
//! records scraped sources and error details on the generation row.

mod error;
mod generator;
mod plan_cache;
mod planner;
mod prompt;
mod runner;

pub use error::EngineError;
pub use generator::{StreamingGenerator, FLUSH_INTERVAL, IDLE_TIMEOUT};
pub use plan_cache::{PlanCache, PLAN_CACHE_CAPACITY, PLAN_TTL_SECS};
pub use planner::{plan_fingerprint, SearchPlanner};
pub use prompt::{
    build_messages, estimate_tokens, web_context_block, PromptInputs, SYSTEM_PROMPT,
};
pub use runner::{ResearchRunner, RunRequest, RECENT_TURN_WINDOW};
