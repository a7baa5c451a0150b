//! Decision Survey - text message survey engine
//!
//! Walks each connection through a decision tree of prompts and answers,
//! recording every accepted answer and timing out idle sessions.
//!
//! Hosts embedding the engine register their custom answer predicates and
//! session listeners before building the [`SessionManager`]:
//!
//! ```rust,ignore
//! use decision_survey::{CustomMatcherRegistry, SessionListenerRegistry};
//!
//! let matchers = Arc::new(CustomMatcherRegistry::new());
//! matchers.register("postcode", |text| text.len() == 5)?;
//! let listeners = Arc::new(SessionListenerRegistry::new());
//! listeners.register("SURVEY", |session, is_ending| { /* ... */ })?;
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod listeners;
pub mod matcher;
pub mod runtime;
pub mod state_machine;
pub mod sweeper;
pub mod tagging;
pub mod transport;
pub mod tree;

// Re-export commonly used types
pub use config::{EngineConfig, ServiceConfig};
pub use db::Database;
pub use listeners::SessionListenerRegistry;
pub use matcher::{register_builtins, CustomMatcherRegistry, Matcher};
pub use runtime::{DatabaseStorage, EngineError, EventReport, SessionManager};
pub use state_machine::EngineContext;
pub use sweeper::TimeoutSweeper;
pub use transport::ChannelTransport;
pub use tree::TreeCatalog;
