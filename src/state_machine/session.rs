//! Session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Reached a terminal state
    Completed,
    /// Ended by the user, or preempted by a new survey on the same connection
    Canceled,
    /// Too many invalid answers on a state with a retry limit
    RetriesExhausted,
    /// The session was parked on a state the tree cannot continue from
    IntegrityFault,
}

impl CloseReason {
    /// Boolean projection kept for storage and for session-ended subscribers
    pub fn canceled(self) -> bool {
        matches!(self, CloseReason::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Completed => "completed",
            CloseReason::Canceled => "canceled",
            CloseReason::RetriesExhausted => "retries_exhausted",
            CloseReason::IntegrityFault => "integrity_fault",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(CloseReason::Completed),
            "canceled" => Some(CloseReason::Canceled),
            "retries_exhausted" => Some(CloseReason::RetriesExhausted),
            "integrity_fault" => Some(CloseReason::IntegrityFault),
            _ => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connection's walk through a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub connection_id: String,
    pub tree_trigger: String,
    /// Current state; `None` once the session has ended
    pub state: Option<String>,
    /// Consecutive invalid answers on the current state
    pub num_tries: u32,
    pub close_reason: Option<CloseReason>,
    pub started_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Session {
    /// A fresh session parked on `root_state`
    pub fn open(
        id: impl Into<String>,
        connection_id: impl Into<String>,
        tree_trigger: impl Into<String>,
        root_state: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            connection_id: connection_id.into(),
            tree_trigger: tree_trigger.into(),
            state: Some(root_state.into()),
            num_tries: 0,
            close_reason: None,
            started_at: now,
            last_modified: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.close_reason.is_none()
    }

    pub fn canceled(&self) -> bool {
        self.close_reason.is_some_and(CloseReason::canceled)
    }

    /// Closed copy of this session
    #[must_use]
    pub fn closed(&self, reason: CloseReason, now: DateTime<Utc>) -> Self {
        Self {
            state: None,
            close_reason: Some(reason),
            last_modified: now,
            ..self.clone()
        }
    }
}
