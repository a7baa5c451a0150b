//! HTTP API for the survey service
//!
//! A generic JSON gateway: inbound texts are POSTed, outbound replies and
//! session-ended events are streamed back over SSE.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::db::Database;
use crate::runtime::ProductionManager;
use crate::transport::ChannelTransport;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ProductionManager>,
    pub transport: ChannelTransport,
    pub db: Database,
}

impl AppState {
    pub fn new(manager: Arc<ProductionManager>, transport: ChannelTransport, db: Database) -> Self {
        Self {
            manager,
            transport,
            db,
        }
    }
}
