//! Database module for the survey engine
//!
//! Persists sessions, their entries and entry tags, and queued tag
//! notifications in SQLite.

mod schema;

pub use schema::*;
use schema::{format_datetime, read_close_reason, read_datetime};

use crate::tagging::PendingNotification;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

const SESSION_COLUMNS: &str = "id, connection_id, tree_trigger, state, num_tries, close_reason, \
                               started_at, last_modified";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Session Operations ====================

    /// Insert a newly opened session
    pub fn create_session(&self, session: &Session) -> DbResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sessions (id, connection_id, tree_trigger, state, num_tries, close_reason, canceled, started_at, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.id,
                session.connection_id,
                session.tree_trigger,
                session.state,
                session.num_tries,
                session.close_reason.map(CloseReason::as_str),
                session.canceled(),
                format_datetime(session.started_at),
                format_datetime(session.last_modified),
            ],
        )?;
        Ok(())
    }

    /// Store the current version of an existing session
    pub fn update_session(&self, session: &Session) -> DbResult<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE sessions SET state = ?1, num_tries = ?2, close_reason = ?3, canceled = ?4, last_modified = ?5
             WHERE id = ?6",
            params![
                session.state,
                session.num_tries,
                session.close_reason.map(CloseReason::as_str),
                session.canceled(),
                format_datetime(session.last_modified),
                session.id,
            ],
        )?;

        if updated == 0 {
            return Err(DbError::SessionNotFound(session.id.clone()));
        }
        Ok(())
    }

    /// Get session by ID
    pub fn get_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;

        stmt.query_row(params![id], parse_session_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(id.to_string()),
                other => DbError::Sqlite(other),
            })
    }

    /// The connection's open session, if it has one
    pub fn find_open_session(&self, connection_id: &str) -> DbResult<Option<Session>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE connection_id = ?1 AND close_reason IS NULL"
        ))?;

        stmt.query_row(params![connection_id], parse_session_row)
            .optional()
            .map_err(DbError::from)
    }

    /// Open sessions untouched since `cutoff`, oldest first
    pub fn find_sessions_idle_since(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Session>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE close_reason IS NULL AND last_modified <= ?1
             ORDER BY last_modified ASC"
        ))?;

        let rows = stmt.query_map(params![format_datetime(cutoff)], parse_session_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a session and, by cascade, its entries and notifications
    pub fn delete_session(&self, id: &str) -> DbResult<()> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== Entry Operations ====================

    /// Append an entry with the next sequence id for its session
    pub fn append_entry(
        &self,
        session_id: &str,
        transition_id: &str,
        text: &str,
        tags: &[String],
    ) -> DbResult<Entry> {
        let mut conn = self.lock();
        let now = Utc::now();
        let tx = conn.transaction()?;

        let sequence_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM entries WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO entries (session_id, sequence_id, transition_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, sequence_id, transition_id, text, format_datetime(now)],
        )?;
        let id = tx.last_insert_rowid();

        let mut stored = Vec::with_capacity(tags.len());
        for tag in tags {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO entry_tags (entry_id, tag) VALUES (?1, ?2)",
                params![id, tag],
            )?;
            if inserted > 0 {
                stored.push(tag.clone());
            }
        }
        tx.commit()?;

        Ok(Entry {
            id,
            session_id: session_id.to_string(),
            sequence_id,
            transition_id: transition_id.to_string(),
            text: text.to_string(),
            tags: stored,
            created_at: now,
        })
    }

    /// Entries for a session in sequence order
    pub fn get_entries(&self, session_id: &str) -> DbResult<Vec<Entry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sequence_id, transition_id, text, created_at
             FROM entries WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let mut tag_stmt =
            conn.prepare("SELECT tag FROM entry_tags WHERE entry_id = ?1 ORDER BY rowid ASC")?;

        let entries = stmt
            .query_map(params![session_id], |row| {
                Ok(Entry {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    sequence_id: row.get(2)?,
                    transition_id: row.get(3)?,
                    text: row.get(4)?,
                    tags: Vec::new(),
                    created_at: read_datetime(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        entries
            .into_iter()
            .map(|mut entry| -> DbResult<Entry> {
                entry.tags = tag_stmt
                    .query_map(params![entry.id], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(entry)
            })
            .collect()
    }

    // ==================== Notification Operations ====================

    /// Queue a notification; returns false if the same one is already queued
    pub fn enqueue_notification(&self, notification: &PendingNotification) -> DbResult<bool> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tag_notifications (tag, recipient, entry_id, sent, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                notification.tag,
                notification.recipient,
                notification.entry_id,
                format_datetime(Utc::now()),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Notifications not yet marked sent, oldest first
    pub fn pending_notifications(&self) -> DbResult<Vec<TagNotification>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tag, recipient, entry_id, sent, created_at
             FROM tag_notifications WHERE sent = 0 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(TagNotification {
                id: row.get(0)?,
                tag: row.get(1)?,
                recipient: row.get(2)?,
                entry_id: row.get(3)?,
                sent: row.get(4)?,
                created_at: read_datetime(row, 5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

/// Parse a session row selected with `SESSION_COLUMNS`
fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        tree_trigger: row.get(2)?,
        state: row.get(3)?,
        num_tries: row.get(4)?,
        close_reason: read_close_reason(row, 5)?,
        started_at: read_datetime(row, 6)?,
        last_modified: read_datetime(row, 7)?,
    })
}
