//! Immutable inputs shared by every transition

use crate::config::EngineConfig;
use crate::matcher::Matcher;
use crate::tree::TreeCatalog;
use std::sync::Arc;

/// Everything a transition may read besides the session and the message
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub catalog: Arc<TreeCatalog>,
    pub matcher: Matcher,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(catalog: Arc<TreeCatalog>, matcher: Matcher, config: EngineConfig) -> Self {
        Self {
            catalog,
            matcher,
            config,
        }
    }

    /// Message text followed by one hint line per outgoing transition
    pub fn prompt(&self, state_id: &str) -> Option<String> {
        let message = self.catalog.state_message(state_id)?;
        Some(with_hints(&message.text, &self.catalog.hint_lines(state_id)))
    }

    /// Generic invalid-answer reply listing the valid options
    pub fn invalid_answer_reply(&self, state_id: &str) -> String {
        with_hints(
            &self.config.invalid_answer_message,
            &self.catalog.hint_lines(state_id),
        )
    }
}

fn with_hints(head: &str, hints: &[String]) -> String {
    if hints.is_empty() {
        head.to_string()
    } else {
        format!("{head}\n{}", hints.join("\n"))
    }
}
