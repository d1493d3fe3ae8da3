use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use curio_core::ids::{ConversationId, MessageId};
use curio_core::turns::{ConversationTurn, TurnRole};

use crate::database::Database;
use crate::error::StoreError;
use crate::rows::{parse_rfc3339, ReadRow};

/// A stored conversation row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: ConversationId,
    pub title: Option<String>,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A stored turn row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnRow {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub role: TurnRole,
    pub text: String,
    pub created_at: String,
}

impl TurnRow {
    /// Convert to the shape the pipeline reads.
    pub fn to_turn(&self) -> Result<ConversationTurn, StoreError> {
        Ok(ConversationTurn {
            role: self.role,
            text: self.text.clone(),
            timestamp: parse_rfc3339(&self.created_at, "turns.created_at")?,
        })
    }
}

/// Narrow conversation surface: ensure the row exists, check write access,
/// append turns, read a recent window. Everything else about conversations
/// lives outside this service.
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the conversation if it does not exist yet. Existing rows,
    /// archived ones included, are returned unchanged.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn ensure(&self, id: &ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![id.as_str(), now],
            )?;
            select_conversation(conn, id)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: &ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| select_conversation(conn, id))
    }

    /// Whether new turns and generations may be written. False for missing
    /// or archived conversations.
    pub fn can_write(&self, id: &ConversationId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT archived FROM conversations WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let archived: i64 = row.read(0, "conversations.archived")?;
                    Ok(archived == 0)
                }
                None => Ok(false),
            }
        })
    }

    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn archive(&self, id: &ConversationId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET archived = 1, updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id.as_str(), Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    /// Append a turn. The caller supplies the message id so assistant turns
    /// keep the id announced when their generation was triggered.
    #[instrument(skip(self, text), fields(conversation_id = %conversation_id, message_id = %message_id, role = %role))]
    pub fn append_turn(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        role: TurnRole,
        text: &str,
    ) -> Result<TurnRow, StoreError> {
        self.db.with_conn(|conn| {
            let exists = conn
                .prepare("SELECT 1 FROM conversations WHERE id = ?1")?
                .exists([conversation_id.as_str()])?;
            if !exists {
                return Err(StoreError::NotFound(format!(
                    "conversation {conversation_id}"
                )));
            }

            let now = Utc::now().to_rfc3339();
            let inserted = conn.execute(
                "INSERT INTO turns (message_id, conversation_id, role, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message_id.as_str(),
                    conversation_id.as_str(),
                    role.to_string(),
                    text,
                    now,
                ],
            );
            if let Err(rusqlite::Error::SqliteFailure(e, _)) = &inserted {
                if e.code == rusqlite::ErrorCode::ConstraintViolation {
                    return Err(StoreError::Conflict(format!(
                        "turn {message_id} already recorded"
                    )));
                }
            }
            inserted?;

            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, conversation_id.as_str()],
            )?;

            Ok(TurnRow {
                message_id: message_id.clone(),
                conversation_id: conversation_id.clone(),
                role,
                text: text.to_string(),
                created_at: now,
            })
        })
    }

    /// The most recent turns, returned oldest first. This is the window the
    /// pipeline feeds to planning and prompt assembly.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, limit))]
    pub fn recent_turns(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, conversation_id, role, text, created_at
                 FROM turns WHERE conversation_id = ?1
                 ORDER BY created_at DESC, message_id DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![conversation_id.as_str(), limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_turn(row)?);
            }
            Ok(out)
        })?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            turns.push(row.to_turn()?);
        }
        Ok(turns)
    }
}

fn select_conversation(
    conn: &rusqlite::Connection,
    id: &ConversationId,
) -> Result<ConversationRow, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, archived, created_at, updated_at FROM conversations WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_conversation(row),
        None => Err(StoreError::NotFound(format!("conversation {id}"))),
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let archived: i64 = row.read(2, "conversations.archived")?;
    Ok(ConversationRow {
        id: row.read_parsed(0, "conversations.id")?,
        title: row.read_opt(1, "conversations.title")?,
        archived: archived != 0,
        created_at: row.read(3, "conversations.created_at")?,
        updated_at: row.read(4, "conversations.updated_at")?,
    })
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> Result<TurnRow, StoreError> {
    Ok(TurnRow {
        message_id: row.read_parsed(0, "turns.message_id")?,
        conversation_id: row.read_parsed(1, "turns.conversation_id")?,
        role: row.read_parsed(2, "turns.role")?,
        text: row.read(3, "turns.text")?,
        created_at: row.read(4, "turns.created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, ConversationId) {
        let db = Database::in_memory().unwrap();
        let conv = ConversationId::new();
        ConversationRepo::new(db.clone()).ensure(&conv).unwrap();
        (db, conv)
    }

    #[test]
    fn ensure_is_idempotent() {
        let (db, conv) = setup();
        let repo = ConversationRepo::new(db);
        let first = repo.get(&conv).unwrap();
        let second = repo.ensure(&conv).unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn get_missing_conversation() {
        let db = Database::in_memory().unwrap();
        let repo = ConversationRepo::new(db);
        let err = repo.get(&ConversationId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn can_write_lifecycle() {
        let (db, conv) = setup();
        let repo = ConversationRepo::new(db);

        assert!(repo.can_write(&conv).unwrap());
        assert!(!repo.can_write(&ConversationId::new()).unwrap());

        repo.archive(&conv).unwrap();
        assert!(!repo.can_write(&conv).unwrap());

        // ensure() must not resurrect an archived conversation
        repo.ensure(&conv).unwrap();
        assert!(!repo.can_write(&conv).unwrap());
    }

    #[test]
    fn append_and_read_turns() {
        let (db, conv) = setup();
        let repo = ConversationRepo::new(db);

        repo.append_turn(&conv, &MessageId::new(), TurnRole::User, "hello")
            .unwrap();
        repo.append_turn(&conv, &MessageId::new(), TurnRole::Assistant, "hi there")
            .unwrap();

        let turns = repo.recent_turns(&conv, 10).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].text, "hello");
        assert_eq!(turns[1].role, TurnRole::Assistant);
    }

    #[test]
    fn recent_turns_window_keeps_newest() {
        let (db, conv) = setup();
        let repo = ConversationRepo::new(db);

        for i in 0..5 {
            repo.append_turn(&conv, &MessageId::new(), TurnRole::User, &format!("msg {i}"))
                .unwrap();
        }

        let turns = repo.recent_turns(&conv, 3).unwrap();
        assert_eq!(turns.len(), 3);
        // Oldest-first within the window, window anchored at the newest
        assert_eq!(turns[0].text, "msg 2");
        assert_eq!(turns[2].text, "msg 4");
    }

    #[test]
    fn append_turn_missing_conversation() {
        let db = Database::in_memory().unwrap();
        let repo = ConversationRepo::new(db);
        let err = repo
            .append_turn(&ConversationId::new(), &MessageId::new(), TurnRole::User, "x")
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn duplicate_message_id_conflicts() {
        let (db, conv) = setup();
        let repo = ConversationRepo::new(db);
        let msg = MessageId::new();

        repo.append_turn(&conv, &msg, TurnRole::Assistant, "answer")
            .unwrap();
        let err = repo
            .append_turn(&conv, &msg, TurnRole::Assistant, "answer again")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn append_bumps_conversation_updated_at() {
        let (db, conv) = setup();
        let repo = ConversationRepo::new(db);
        let before = repo.get(&conv).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        repo.append_turn(&conv, &MessageId::new(), TurnRole::User, "hey")
            .unwrap();

        let after = repo.get(&conv).unwrap();
        assert!(after.updated_at > before.updated_at);
    }
}
