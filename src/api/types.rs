//! API request and response types

use crate::db::{Entry, TagNotification};
use crate::state_machine::Session;
use serde::{Deserialize, Serialize};

/// An inbound text from a gateway
#[derive(Debug, Deserialize)]
pub struct IncomingRequest {
    pub connection_id: String,
    pub text: String,
}

/// Result of handling an inbound text
#[derive(Debug, Serialize)]
pub struct IncomingResponse {
    pub handled: bool,
    pub replies: Vec<String>,
    pub delivery_failures: usize,
}

/// A session and every answer recorded in it
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
    pub entries: Vec<Entry>,
}

/// One tree in the catalog
#[derive(Debug, Serialize)]
pub struct TreeSummary {
    pub trigger: String,
    pub root_state: String,
    pub summary: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TreeListResponse {
    pub trees: Vec<TreeSummary>,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<TagNotification>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
