use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Typed column access with corruption context attached.
///
/// `at` names the column as `table.column` and lands in
/// [`StoreError::CorruptRow`] when the stored value cannot be read as the
/// requested type.
pub trait ReadRow {
    /// A required column in its SQL type.
    fn read<T: rusqlite::types::FromSql>(
        &self,
        idx: usize,
        at: &'static str,
    ) -> Result<T, StoreError>;

    /// A nullable column.
    fn read_opt<T: rusqlite::types::FromSql>(
        &self,
        idx: usize,
        at: &'static str,
    ) -> Result<Option<T>, StoreError>;

    /// A TEXT column parsed through `FromStr`: ids, state names, roles.
    fn read_parsed<T: FromStr>(&self, idx: usize, at: &'static str) -> Result<T, StoreError>;

    /// A TEXT column holding a JSON document.
    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        idx: usize,
        at: &'static str,
    ) -> Result<T, StoreError>;
}

impl ReadRow for rusqlite::Row<'_> {
    fn read<T: rusqlite::types::FromSql>(
        &self,
        idx: usize,
        at: &'static str,
    ) -> Result<T, StoreError> {
        self.get(idx).map_err(|e| corrupt(at, e.to_string()))
    }

    fn read_opt<T: rusqlite::types::FromSql>(
        &self,
        idx: usize,
        at: &'static str,
    ) -> Result<Option<T>, StoreError> {
        self.get(idx).map_err(|e| corrupt(at, e.to_string()))
    }

    fn read_parsed<T: FromStr>(&self, idx: usize, at: &'static str) -> Result<T, StoreError> {
        let raw: String = self.read(idx, at)?;
        raw.parse()
            .map_err(|_| corrupt(at, format!("unparseable value: {raw}")))
    }

    fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        idx: usize,
        at: &'static str,
    ) -> Result<T, StoreError> {
        let raw: String = self.read(idx, at)?;
        serde_json::from_str(&raw).map_err(|e| corrupt(at, format!("invalid JSON: {e}")))
    }
}

/// RFC 3339 timestamps are stored as TEXT and parsed on the way out.
pub fn parse_rfc3339(raw: &str, at: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(at, e.to_string()))
}

fn corrupt(at: &'static str, detail: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        at,
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curio_core::ids::GenerationId;
    use curio_core::session::GenerationState;

    fn with_row<T>(value: Option<&str>, f: impl FnOnce(&rusqlite::Row<'_>) -> T) -> T {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT)").unwrap();
        conn.execute("INSERT INTO t (v) VALUES (?1)", [value]).unwrap();
        let mut stmt = conn.prepare("SELECT v FROM t").unwrap();
        let mut rows = stmt.query([]).unwrap();
        f(rows.next().unwrap().unwrap())
    }

    #[test]
    fn read_parsed_accepts_known_state() {
        let state: GenerationState =
            with_row(Some("planning"), |row| row.read_parsed(0, "generations.state").unwrap());
        assert_eq!(state, GenerationState::Planning);
    }

    #[test]
    fn read_parsed_rejects_unknown_state() {
        let err = with_row(Some("warp"), |row| {
            row.read_parsed::<GenerationState>(0, "generations.state")
                .unwrap_err()
        });
        assert!(matches!(
            err,
            StoreError::CorruptRow {
                at: "generations.state",
                ..
            }
        ));
    }

    #[test]
    fn read_parsed_builds_ids() {
        let id: GenerationId =
            with_row(Some("gen_01"), |row| row.read_parsed(0, "frames.generation_id").unwrap());
        assert_eq!(id.as_str(), "gen_01");
    }

    #[test]
    fn read_json_typed_document() {
        let details: Vec<String> = with_row(Some(r#"["a","b"]"#), |row| {
            row.read_json(0, "generations.error_details").unwrap()
        });
        assert_eq!(details, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn read_json_rejects_garbage() {
        let err = with_row(Some("not json"), |row| {
            row.read_json::<serde_json::Value>(0, "frames.payload")
                .unwrap_err()
        });
        assert!(matches!(err, StoreError::CorruptRow { at: "frames.payload", .. }));
    }

    #[test]
    fn read_opt_passes_null_through() {
        let title: Option<String> =
            with_row(None, |row| row.read_opt(0, "conversations.title").unwrap());
        assert_eq!(title, None);
    }

    #[test]
    fn type_mismatch_is_corrupt() {
        let err = with_row(Some("not a number"), |row| {
            row.read::<i64>(0, "frames.sequence").unwrap_err()
        });
        assert!(matches!(err, StoreError::CorruptRow { .. }));
    }

    #[test]
    fn timestamps_roundtrip() {
        let now = Utc::now();
        let parsed = parse_rfc3339(&now.to_rfc3339(), "turns.created_at").unwrap();
        assert_eq!(parsed, now);

        let err = parse_rfc3339("yesterday-ish", "turns.created_at").unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRow {
                at: "turns.created_at",
                ..
            }
        ));
    }
}
