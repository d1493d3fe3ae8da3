pub mod errors;
pub mod frames;
pub mod ids;
pub mod plan;
pub mod provider;
pub mod search;
pub mod session;
pub mod stream;
pub mod summary;
pub mod turns;
pub mod validate;

pub use errors::ProviderError;
pub use frames::StreamFrame;
pub use ids::{ConversationId, GenerationId, MessageId};
pub use session::{GenerationSession, GenerationState};
