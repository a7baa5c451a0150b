//! Database schema and record types

pub use crate::state_machine::{CloseReason, Session};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    tree_trigger TEXT NOT NULL,
    state TEXT,
    num_tries INTEGER NOT NULL DEFAULT 0,
    close_reason TEXT,
    canceled BOOLEAN NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    last_modified TEXT NOT NULL
);

-- At most one open session per connection
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_open_connection
    ON sessions(connection_id) WHERE close_reason IS NULL;
CREATE INDEX IF NOT EXISTS idx_sessions_last_modified ON sessions(last_modified);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    transition_id TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE (session_id, sequence_id),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS entry_tags (
    entry_id INTEGER NOT NULL,
    tag TEXT NOT NULL,

    PRIMARY KEY (entry_id, tag),
    FOREIGN KEY (entry_id) REFERENCES entries(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tag_notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    recipient TEXT NOT NULL,
    entry_id INTEGER NOT NULL,
    sent BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    UNIQUE (tag, recipient, entry_id),
    FOREIGN KEY (entry_id) REFERENCES entries(id) ON DELETE CASCADE
);
";

/// One accepted answer, in the order it was given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub session_id: String,
    /// 1-based position within the session
    pub sequence_id: i64,
    pub transition_id: String,
    pub text: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A queued notification for one tag recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagNotification {
    pub id: i64,
    pub tag: String,
    pub recipient: String,
    pub entry_id: i64,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Fixed-width UTC timestamps so text comparison in SQL orders correctly
pub(super) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read a timestamp column; a malformed value fails the row
pub(super) fn read_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a nullable close reason column; an unknown value fails the row
pub(super) fn read_close_reason(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<CloseReason>> {
    let Some(raw) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    CloseReason::parse(&raw).map(Some).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown close reason '{raw}'").into(),
        )
    })
}
