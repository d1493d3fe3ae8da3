/// SQL DDL for the curio-store database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS turns (
    message_id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    role TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS generations (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    assistant_message_id TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'planning',
    content TEXT NOT NULL DEFAULT '',
    thinking TEXT NOT NULL DEFAULT '',
    sources TEXT NOT NULL DEFAULT '[]',
    error_details TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS frames (
    generation_id TEXT NOT NULL REFERENCES generations(id),
    sequence INTEGER NOT NULL,
    frame_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (generation_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, created_at);
CREATE INDEX IF NOT EXISTS idx_generations_conversation ON generations(conversation_id);
CREATE INDEX IF NOT EXISTS idx_generations_message ON generations(assistant_message_id);

-- At most one non-terminal generation per assistant message.
CREATE UNIQUE INDEX IF NOT EXISTS idx_generations_active
    ON generations(assistant_message_id) WHERE state NOT IN ('done', 'error');

-- Exactly one terminal frame per generation.
CREATE UNIQUE INDEX IF NOT EXISTS idx_frames_terminal
    ON frames(generation_id) WHERE frame_type IN ('complete', 'error');

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
