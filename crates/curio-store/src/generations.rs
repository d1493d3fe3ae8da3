use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use curio_core::ids::{ConversationId, GenerationId, MessageId};
use curio_core::search::ScrapedSource;
use curio_core::session::{GenerationSession, GenerationState};

use crate::database::Database;
use crate::error::StoreError;
use crate::rows::{parse_rfc3339, ReadRow};

/// A stored generation row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationRow {
    pub id: GenerationId,
    pub conversation_id: ConversationId,
    pub assistant_message_id: MessageId,
    pub state: GenerationState,
    pub content: String,
    pub thinking: String,
    pub sources: Vec<ScrapedSource>,
    pub error_details: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl GenerationRow {
    pub fn to_session(&self) -> Result<GenerationSession, StoreError> {
        Ok(GenerationSession {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            assistant_message_id: self.assistant_message_id.clone(),
            state: self.state,
            streamed_content: self.content.clone(),
            thinking_trace: self.thinking.clone(),
            sources: self.sources.clone(),
            error_details: self.error_details.clone(),
            created_at: parse_rfc3339(&self.created_at, "generations.created_at")?,
            updated_at: parse_rfc3339(&self.updated_at, "generations.updated_at")?,
        })
    }
}

pub struct GenerationRepo {
    db: Database,
}

impl GenerationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a generation in the planning state. At most one non-terminal
    /// generation may exist per assistant message; a second create while one
    /// is in flight returns Conflict.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, assistant_message_id = %assistant_message_id))]
    pub fn create(
        &self,
        conversation_id: &ConversationId,
        assistant_message_id: &MessageId,
    ) -> Result<GenerationRow, StoreError> {
        self.db.with_conn(|conn| {
            let exists = conn
                .prepare("SELECT 1 FROM conversations WHERE id = ?1")?
                .exists([conversation_id.as_str()])?;
            if !exists {
                return Err(StoreError::NotFound(format!(
                    "conversation {conversation_id}"
                )));
            }

            let id = GenerationId::new();
            let now = Utc::now().to_rfc3339();
            let inserted = conn.execute(
                "INSERT INTO generations (id, conversation_id, assistant_message_id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    id.as_str(),
                    conversation_id.as_str(),
                    assistant_message_id.as_str(),
                    GenerationState::Planning.to_string(),
                    now,
                ],
            );
            if let Err(rusqlite::Error::SqliteFailure(e, _)) = &inserted {
                if e.code == rusqlite::ErrorCode::ConstraintViolation {
                    return Err(StoreError::Conflict(format!(
                        "generation already active for message {assistant_message_id}"
                    )));
                }
            }
            inserted?;

            Ok(GenerationRow {
                id,
                conversation_id: conversation_id.clone(),
                assistant_message_id: assistant_message_id.clone(),
                state: GenerationState::Planning,
                content: String::new(),
                thinking: String::new(),
                sources: Vec::new(),
                error_details: Vec::new(),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(generation_id = %id))]
    pub fn get(&self, id: &GenerationId) -> Result<GenerationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, assistant_message_id, state, content, thinking,
                        sources, error_details, created_at, updated_at
                 FROM generations WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_generation(row),
                None => Err(StoreError::NotFound(format!("generation {id}"))),
            }
        })
    }

    /// Advance the state machine. Illegal transitions, including any move out
    /// of a terminal state, return Conflict and leave the row unchanged.
    #[instrument(skip(self), fields(generation_id = %id, next = %next))]
    pub fn set_state(&self, id: &GenerationId, next: GenerationState) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let current = current_state(conn, id)?;
            if !current.can_transition_to(next) {
                return Err(StoreError::Conflict(format!(
                    "illegal generation state transition: {current} -> {next}"
                )));
            }
            conn.execute(
                "UPDATE generations SET state = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.as_str(), next.to_string(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Append a streamed delta. Content only grows; every persisted value is
    /// a prefix of the next.
    #[instrument(skip(self, delta), fields(generation_id = %id, delta_len = delta.len()))]
    pub fn append_content(&self, id: &GenerationId, delta: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE generations SET content = content || ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.as_str(), delta, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("generation {id}")));
            }
            Ok(())
        })
    }

    /// Replace the full content. Used when an answer arrives whole instead of
    /// as deltas.
    #[instrument(skip(self, content), fields(generation_id = %id, len = content.len()))]
    pub fn set_content(&self, id: &GenerationId, content: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE generations SET content = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.as_str(), content, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("generation {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, delta), fields(generation_id = %id, delta_len = delta.len()))]
    pub fn append_thinking(&self, id: &GenerationId, delta: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE generations SET thinking = thinking || ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.as_str(), delta, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("generation {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, sources), fields(generation_id = %id, count = sources.len()))]
    pub fn set_sources(
        &self,
        id: &GenerationId,
        sources: &[ScrapedSource],
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE generations SET sources = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![
                    id.as_str(),
                    serde_json::to_string(sources)?,
                    Utc::now().to_rfc3339()
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("generation {id}")));
            }
            Ok(())
        })
    }

    /// Record a provider or pipeline error against the row without touching
    /// its state.
    #[instrument(skip(self, detail), fields(generation_id = %id))]
    pub fn record_error(&self, id: &GenerationId, detail: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let mut details: Vec<String> = {
                let mut stmt =
                    conn.prepare("SELECT error_details FROM generations WHERE id = ?1")?;
                let mut rows = stmt.query([id.as_str()])?;
                match rows.next()? {
                    Some(row) => row.read_json(0, "generations.error_details")?,
                    None => return Err(StoreError::NotFound(format!("generation {id}"))),
                }
            };
            details.push(detail.to_string());
            conn.execute(
                "UPDATE generations SET error_details = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![
                    id.as_str(),
                    serde_json::to_string(&details)?,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }
}

fn current_state(
    conn: &rusqlite::Connection,
    id: &GenerationId,
) -> Result<GenerationState, StoreError> {
    let mut stmt = conn.prepare("SELECT state FROM generations WHERE id = ?1")?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => row.read_parsed(0, "generations.state"),
        None => Err(StoreError::NotFound(format!("generation {id}"))),
    }
}

fn row_to_generation(row: &rusqlite::Row<'_>) -> Result<GenerationRow, StoreError> {
    Ok(GenerationRow {
        id: row.read_parsed(0, "generations.id")?,
        conversation_id: row.read_parsed(1, "generations.conversation_id")?,
        assistant_message_id: row.read_parsed(2, "generations.assistant_message_id")?,
        state: row.read_parsed(3, "generations.state")?,
        content: row.read(4, "generations.content")?,
        thinking: row.read(5, "generations.thinking")?,
        sources: row.read_json(6, "generations.sources")?,
        error_details: row.read_json(7, "generations.error_details")?,
        created_at: row.read(8, "generations.created_at")?,
        updated_at: row.read(9, "generations.updated_at")?,
    })
}
