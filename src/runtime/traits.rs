//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, DbError, Entry};
use crate::state_machine::Session;
use crate::tagging::PendingNotification;
use crate::transport::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Storage for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The connection's open session, if any
    async fn find_open_session(&self, connection_id: &str) -> Result<Option<Session>, String>;

    async fn create_session(&self, session: &Session) -> Result<(), String>;

    async fn update_session(&self, session: &Session) -> Result<(), String>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>, String>;

    /// Open sessions whose last activity is at or before `cutoff`
    async fn find_sessions_idle_since(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<Session>, String>;
}

/// Append-only storage for accepted answers
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Append an entry, allocating the session's next sequence id
    async fn append_entry(
        &self,
        session_id: &str,
        transition_id: &str,
        text: &str,
        tags: &[String],
    ) -> Result<Entry, String>;

    async fn get_entries(&self, session_id: &str) -> Result<Vec<Entry>, String>;
}

/// Where tag notifications go to wait for delivery
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, notification: &PendingNotification) -> Result<(), String>;
}

/// Sends text back to a connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, connection_id: &str, text: &str) -> Result<(), TransportError>;
}

/// Combined storage trait for convenience
pub trait Storage: SessionStore + EntryStore + NotificationQueue {}
impl<T: SessionStore + EntryStore + NotificationQueue> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn find_open_session(&self, connection_id: &str) -> Result<Option<Session>, String> {
        (**self).find_open_session(connection_id).await
    }

    async fn create_session(&self, session: &Session) -> Result<(), String> {
        (**self).create_session(session).await
    }

    async fn update_session(&self, session: &Session) -> Result<(), String> {
        (**self).update_session(session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, String> {
        (**self).get_session(id).await
    }

    async fn find_sessions_idle_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, String> {
        (**self).find_sessions_idle_since(cutoff).await
    }
}

#[async_trait]
impl<T: EntryStore + ?Sized> EntryStore for Arc<T> {
    async fn append_entry(
        &self,
        session_id: &str,
        transition_id: &str,
        text: &str,
        tags: &[String],
    ) -> Result<Entry, String> {
        (**self)
            .append_entry(session_id, transition_id, text, tags)
            .await
    }

    async fn get_entries(&self, session_id: &str) -> Result<Vec<Entry>, String> {
        (**self).get_entries(session_id).await
    }
}

#[async_trait]
impl<T: NotificationQueue + ?Sized> NotificationQueue for Arc<T> {
    async fn enqueue(&self, notification: &PendingNotification) -> Result<(), String> {
        (**self).enqueue(notification).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn deliver(&self, connection_id: &str, text: &str) -> Result<(), TransportError> {
        (**self).deliver(connection_id, text).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for DatabaseStorage {
    async fn find_open_session(&self, connection_id: &str) -> Result<Option<Session>, String> {
        self.db
            .find_open_session(connection_id)
            .map_err(|e| e.to_string())
    }

    async fn create_session(&self, session: &Session) -> Result<(), String> {
        self.db.create_session(session).map_err(|e| e.to_string())
    }

    async fn update_session(&self, session: &Session) -> Result<(), String> {
        self.db.update_session(session).map_err(|e| e.to_string())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, String> {
        match self.db.get_session(id) {
            Ok(session) => Ok(Some(session)),
            Err(DbError::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn find_sessions_idle_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, String> {
        self.db
            .find_sessions_idle_since(cutoff)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl EntryStore for DatabaseStorage {
    async fn append_entry(
        &self,
        session_id: &str,
        transition_id: &str,
        text: &str,
        tags: &[String],
    ) -> Result<Entry, String> {
        self.db
            .append_entry(session_id, transition_id, text, tags)
            .map_err(|e| e.to_string())
    }

    async fn get_entries(&self, session_id: &str) -> Result<Vec<Entry>, String> {
        self.db.get_entries(session_id).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl NotificationQueue for DatabaseStorage {
    async fn enqueue(&self, notification: &PendingNotification) -> Result<(), String> {
        let inserted = self
            .db
            .enqueue_notification(notification)
            .map_err(|e| e.to_string())?;
        if !inserted {
            tracing::debug!(
                tag = %notification.tag,
                recipient = %notification.recipient,
                entry_id = notification.entry_id,
                "Notification already queued"
            );
        }
        Ok(())
    }
}
