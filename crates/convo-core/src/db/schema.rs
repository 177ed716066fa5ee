//! SQLite schema for the conversation store.
//!
//! - `conversations` holds one row per conversation; tags and metadata are
//!   JSON text columns
//! - `messages` holds the chronological message log keyed by
//!   `(conversation_id, message_id)`
//! - `store_meta` tracks the schema version and the last merge batch
//! - `run_lock` is the singleton migration lease

/// Migration v1: conversations, messages and store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    channel TEXT NOT NULL CHECK (channel IN ('whatsapp', 'instagram', 'email', 'other')),
    identity TEXT NOT NULL,
    identity_key TEXT,
    tags_json TEXT NOT NULL DEFAULT '[]',
    metadata_json TEXT NOT NULL DEFAULT '{}',
    assigned_to TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'archived')),
    merged_into TEXT,
    last_activity_at_us INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL,
    CHECK (length(trim(conversation_id)) > 0)
);

CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id) ON DELETE CASCADE,
    message_id TEXT NOT NULL,
    direction TEXT NOT NULL CHECK (direction IN ('inbound', 'outbound')),
    body TEXT NOT NULL,
    sent_at_us INTEGER NOT NULL,
    source_conversation_id TEXT,
    PRIMARY KEY (conversation_id, message_id)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_merge_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);
";

/// Migration v2: scan indexes and the run lock.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_conversations_status_created
    ON conversations(status, created_at_us, conversation_id);

CREATE INDEX IF NOT EXISTS idx_conversations_channel_identity_key
    ON conversations(channel, identity_key);

CREATE INDEX IF NOT EXISTS idx_conversations_merged_into
    ON conversations(merged_into);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_sent
    ON messages(conversation_id, sent_at_us);

CREATE TABLE IF NOT EXISTS run_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    token TEXT NOT NULL,
    acquired_at_us INTEGER NOT NULL,
    expires_at_us INTEGER NOT NULL
);
";

/// Indexes expected after all migrations.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_conversations_status_created",
    "idx_conversations_channel_identity_key",
    "idx_conversations_merged_into",
    "idx_messages_conversation_sent",
];
