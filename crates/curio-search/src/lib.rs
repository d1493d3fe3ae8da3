//! Web search for the research pipeline.
//!
//! Three provider families sit behind one [`SearchProvider`] trait: a paid
//! HTTP API ([`SerperProvider`]), a model-backed provider that asks a chat
//! model to emit results ([`ModelSearchProvider`]), and a free SearXNG
//! instance ([`SearxProvider`]). The [`SearchExecutor`] walks them in that
//! order per query, takes the first non-empty batch, then merges, dedupes,
//! and reranks across queries.

mod dedup;
mod executor;
mod grounded;
mod mock;
mod provider;
mod rerank;
mod serper;
mod searx;

pub use dedup::{dedup_results, normalize_url};
pub use executor::{ProviderAttempt, SearchExecutor, SearchOutcome};
pub use grounded::ModelSearchProvider;
pub use mock::MockSearchProvider;
pub use provider::{position_score, SearchError, SearchProvider, SearchQuery};
pub use rerank::{rerank, MAX_RERANKED};
pub use serper::SerperProvider;
pub use searx::SearxProvider;
