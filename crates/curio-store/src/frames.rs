use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use curio_core::frames::{SequencedFrame, StreamFrame};
use curio_core::ids::GenerationId;

use crate::database::Database;
use crate::error::StoreError;
use crate::rows::ReadRow;

/// A stored frame row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameRow {
    pub generation_id: GenerationId,
    pub sequence: i64,
    pub frame_type: String,
    pub frame: StreamFrame,
    pub created_at: String,
}

impl FrameRow {
    /// Shape handed to SSE replay and live subscribers.
    pub fn sequenced(&self) -> SequencedFrame {
        SequencedFrame {
            sequence: self.sequence,
            frame: self.frame.clone(),
        }
    }
}

/// Per-generation append lock for frame linearization.
/// Keeps sequence allocation atomic with the insert.
struct GenerationLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl GenerationLocks {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    fn get(&mut self, generation_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(generation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct FrameRepo {
    db: Database,
    generation_locks: Mutex<GenerationLocks>,
}

impl FrameRepo {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            generation_locks: Mutex::new(GenerationLocks::new()),
        }
    }

    /// Append a frame to a generation's ordered log. Atomically:
    /// 1. Acquires the per-generation lock
    /// 2. Allocates sequence = MAX(sequence) + 1
    /// 3. Inserts the row
    ///
    /// A terminal frame (`complete` or `error`) closes the log. Anything
    /// appended after that, second terminals included, is dropped with
    /// Ok(None) so re-delivery stays idempotent.
    #[instrument(skip(self, frame), fields(generation_id = %generation_id, frame_type = frame.frame_type()))]
    pub fn append(
        &self,
        generation_id: &GenerationId,
        frame: &StreamFrame,
    ) -> Result<Option<FrameRow>, StoreError> {
        let lock = self.generation_locks.lock().get(generation_id.as_str());
        let _guard = lock.lock();

        self.db.with_conn(|conn| {
            let exists = conn
                .prepare("SELECT 1 FROM generations WHERE id = ?1")?
                .exists([generation_id.as_str()])?;
            if !exists {
                return Err(StoreError::NotFound(format!(
                    "generation {generation_id}"
                )));
            }

            let terminal_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM frames
                 WHERE generation_id = ?1 AND frame_type IN ('complete', 'error')",
                [generation_id.as_str()],
                |row| row.get(0),
            )?;
            if terminal_count > 0 {
                warn!(
                    generation_id = %generation_id,
                    frame_type = frame.frame_type(),
                    "frame after terminal dropped"
                );
                return Ok(None);
            }

            let max_seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), -1) FROM frames WHERE generation_id = ?1",
                [generation_id.as_str()],
                |row| row.get(0),
            )?;
            let sequence = max_seq + 1;
            let now = Utc::now().to_rfc3339();
            let frame_type = frame.frame_type();

            conn.execute(
                "INSERT INTO frames (generation_id, sequence, frame_type, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    generation_id.as_str(),
                    sequence,
                    frame_type,
                    serde_json::to_string(frame)?,
                    now,
                ],
            )?;

            Ok(Some(FrameRow {
                generation_id: generation_id.clone(),
                sequence,
                frame_type: frame_type.to_string(),
                frame: frame.clone(),
                created_at: now,
            }))
        })
    }

    /// All frames for a generation, ordered by sequence. SSE replay source.
    pub fn list(&self, generation_id: &GenerationId) -> Result<Vec<FrameRow>, StoreError> {
        self.list_after_sequence(generation_id, -1)
    }

    /// Frames with sequence strictly greater than `after`. Used to resume a
    /// dropped stream from its Last-Event-ID.
    #[instrument(skip(self), fields(generation_id = %generation_id, after))]
    pub fn list_after_sequence(
        &self,
        generation_id: &GenerationId,
        after: i64,
    ) -> Result<Vec<FrameRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT generation_id, sequence, frame_type, payload, created_at
                 FROM frames WHERE generation_id = ?1 AND sequence > ?2
                 ORDER BY sequence ASC",
            )?;
            let mut rows = stmt.query(rusqlite::params![generation_id.as_str(), after])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_frame(row)?);
            }
            Ok(out)
        })
    }

    pub fn count(&self, generation_id: &GenerationId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM frames WHERE generation_id = ?1",
                [generation_id.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)
        })
    }

}

fn row_to_frame(row: &rusqlite::Row<'_>) -> Result<FrameRow, StoreError> {
    Ok(FrameRow {
        generation_id: row.read_parsed(0, "frames.generation_id")?,
        sequence: row.read(1, "frames.sequence")?,
        frame_type: row.read(2, "frames.frame_type")?,
        frame: row.read_json(3, "frames.payload")?,
        created_at: row.read(4, "frames.created_at")?,
    })
}
