//! Effects produced by state transitions

use super::session::Session;
use thiserror::Error;

/// Tree data problems found while handling a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFault {
    #[error("State '{state}' has no outgoing transitions")]
    NoTransitionsFromState { state: String },
    #[error("Session is parked on unknown state '{state}'")]
    UnknownState { state: String },
}

/// Effects to be executed after a state transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Store a newly opened session
    CreateSession { session: Session },

    /// Store the new version of an existing session (including closure)
    PersistSession { session: Session },

    /// Append an entry for an accepted answer and apply its tags
    RecordEntry {
        session_id: String,
        transition_id: String,
        text: String,
        tags: Vec<String>,
    },

    /// Call the tree's session listener
    NotifyListeners { session: Session, is_ending: bool },

    /// Publish that a session has ended
    SessionEnded {
        session: Session,
        /// Text of the message that ended it, if any
        message: Option<String>,
    },

    /// Send text back on the connection
    Reply { text: String },

    /// Surface a tree data problem to operators
    ReportFault { session_id: String, fault: EngineFault },
}

impl Effect {
    pub fn reply(text: impl Into<String>) -> Self {
        Effect::Reply { text: text.into() }
    }

    /// Effects that accompany every session closure
    pub fn close(session: Session, message: Option<&str>) -> [Effect; 3] {
        [
            Effect::PersistSession {
                session: session.clone(),
            },
            Effect::NotifyListeners {
                session: session.clone(),
                is_ending: true,
            },
            Effect::SessionEnded {
                session,
                message: message.map(str::to_string),
            },
        ]
    }
}
