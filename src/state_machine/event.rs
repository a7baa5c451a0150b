//! Inbound messages fed to the state machine

use chrono::{DateTime, Utc};

/// Text injected by the sweeper when a session has been idle too long
pub const TIMEOUT_TEXT: &str = "TimeOut";

/// A text message received on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub connection_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    /// Id given to the session this message opens, if it opens one
    pub new_session_id: String,
}

impl Inbound {
    pub fn new(connection_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            text: text.into(),
            received_at: Utc::now(),
            new_session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Synthetic message standing in for user inactivity
    pub fn timeout(connection_id: impl Into<String>) -> Self {
        Self::new(connection_id, TIMEOUT_TEXT)
    }
}
