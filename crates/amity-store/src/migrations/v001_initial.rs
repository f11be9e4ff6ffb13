//! v001 -- Initial schema creation.
//!
//! Creates `users`, `friendships`, `dialogs` and `messages`.
//!
//! Timestamps that take part in ordering (`sent_at`, the read cursors) are
//! stored as INTEGER microseconds since the Unix epoch so SQLite compares
//! them numerically. Descriptive timestamps stay RFC-3339 text.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (mirror of the profile subsystem's accounts)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY NOT NULL,
    username    TEXT NOT NULL UNIQUE,
    show_online INTEGER NOT NULL DEFAULT 1,   -- boolean 0/1
    created_at  TEXT NOT NULL                 -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Accepted friendships, one row per canonical pair
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    user_low   INTEGER NOT NULL,
    user_high  INTEGER NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_low, user_high),
    CHECK (user_low < user_high)
);

CREATE INDEX IF NOT EXISTS idx_friendships_high ON friendships(user_high);

-- ----------------------------------------------------------------
-- Dialogs
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS dialogs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_low     INTEGER NOT NULL,
    user_high    INTEGER NOT NULL,
    created_at   TEXT NOT NULL,
    low_read_at  INTEGER NOT NULL,            -- micros, cursor of user_low
    low_read_id  INTEGER NOT NULL DEFAULT 0,
    high_read_at INTEGER NOT NULL,            -- micros, cursor of user_high
    high_read_id INTEGER NOT NULL DEFAULT 0,

    CHECK (user_low < user_high)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_dialogs_pair ON dialogs(user_low, user_high);

-- ----------------------------------------------------------------
-- Messages (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    dialog_id INTEGER NOT NULL,               -- FK -> dialogs(id)
    sender_id INTEGER NOT NULL,
    text      TEXT NOT NULL,
    sent_at   INTEGER NOT NULL,               -- micros

    FOREIGN KEY (dialog_id) REFERENCES dialogs(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_dialog_key
    ON messages(dialog_id, sent_at, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
