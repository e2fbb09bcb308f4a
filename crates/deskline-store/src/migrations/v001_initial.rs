//! v001 -- Initial schema creation.
//!
//! Creates the three support-desk tables: `chat_user`, `chat` and `message`.
//! Identities are stored in their rendered `table:key` form, references
//! included, so filters compare against the same strings the feed carries.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Customers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_user (
    id         TEXT PRIMARY KEY NOT NULL,     -- chat_user:<uuid>
    name       TEXT NOT NULL,
    email      TEXT NOT NULL,
    created_at TEXT NOT NULL                  -- RFC-3339, fixed width
);

-- ----------------------------------------------------------------
-- Chat rooms
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat (
    id         TEXT PRIMARY KEY NOT NULL,     -- chat:<uuid>
    user_id    TEXT NOT NULL,                 -- chat_user:<uuid>, not enforced
    admin_id   TEXT,                          -- identity-provider user id
    status     TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chat_created_at ON chat(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_chat_status ON chat(status);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message (
    id         TEXT PRIMARY KEY NOT NULL,     -- message:<uuid>
    chat_id    TEXT NOT NULL,                 -- chat:<uuid>
    sender_id  TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_message_chat_ts
    ON message(chat_id, created_at ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
