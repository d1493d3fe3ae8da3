use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frames::GenerationStage;
use crate::ids::{ConversationId, GenerationId, MessageId};
use crate::search::ScrapedSource;

/// Lifecycle of one generation.
///
/// Planning → Searching (opt) → Scraping (opt) → Generating → Done,
/// with Error reachable from every non-terminal state. Searching and
/// Scraping are skipped when the plan decides against them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Planning,
    Searching,
    Scraping,
    Generating,
    Done,
    Error,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Whether moving to `next` is legal. Re-entering the current state is
    /// treated as a no-op and allowed.
    pub fn can_transition_to(&self, next: GenerationState) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Planning => matches!(next, Self::Searching | Self::Generating | Self::Error),
            Self::Searching => matches!(next, Self::Scraping | Self::Generating | Self::Error),
            Self::Scraping => matches!(next, Self::Generating | Self::Error),
            Self::Generating => matches!(next, Self::Done | Self::Error),
            Self::Done | Self::Error => false,
        }
    }
}

impl From<GenerationStage> for GenerationState {
    fn from(stage: GenerationStage) -> Self {
        match stage {
            GenerationStage::Planning => Self::Planning,
            GenerationStage::Searching => Self::Searching,
            GenerationStage::Scraping => Self::Scraping,
            GenerationStage::Generating => Self::Generating,
        }
    }
}

impl std::fmt::Display for GenerationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Searching => "searching",
            Self::Scraping => "scraping",
            Self::Generating => "generating",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for GenerationState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Self::Planning),
            "searching" => Ok(Self::Searching),
            "scraping" => Ok(Self::Scraping),
            "generating" => Ok(Self::Generating),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown generation state: {other}")),
        }
    }
}

/// Mutable state of one in-flight (or finished) generation.
/// At most one non-terminal session exists per assistant message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationSession {
    pub id: GenerationId,
    pub conversation_id: ConversationId,
    pub assistant_message_id: MessageId,
    pub state: GenerationState,
    /// Grows by appends only; every persisted value is a prefix of the next.
    pub streamed_content: String,
    pub thinking_trace: String,
    pub sources: Vec<ScrapedSource>,
    pub error_details: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationSession {
    pub fn new(conversation_id: ConversationId, assistant_message_id: MessageId) -> Self {
        let now = Utc::now();
        Self {
            id: GenerationId::new(),
            conversation_id,
            assistant_message_id,
            state: GenerationState::Planning,
            streamed_content: String::new(),
            thinking_trace: String::new(),
            sources: Vec::new(),
            error_details: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
