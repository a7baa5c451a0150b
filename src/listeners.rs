//! Session listener registry
//!
//! Listeners are keyed by tree trigger and called with `(session, false)`
//! when a session opens and `(session, true)` when it closes.

use crate::matcher::RegistryError;
use crate::state_machine::Session;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

pub type SessionListener = Arc<dyn Fn(&Session, bool) + Send + Sync>;

#[derive(Default)]
pub struct SessionListenerRegistry {
    listeners: RwLock<HashMap<String, SessionListener>>,
}

impl std::fmt::Debug for SessionListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let triggers: Vec<String> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("SessionListenerRegistry")
            .field("triggers", &triggers)
            .finish()
    }
}

fn key(trigger: &str) -> String {
    trigger.trim().to_lowercase()
}

impl SessionListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listener for a tree. Only one listener per tree.
    pub fn register<F>(&self, trigger: &str, listener: F) -> Result<(), RegistryError>
    where
        F: Fn(&Session, bool) + Send + Sync + 'static,
    {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let key = key(trigger);
        if listeners.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(trigger.to_string()));
        }
        tracing::info!(trigger = %trigger, "Registered session listener");
        listeners.insert(key, Arc::new(listener));
        Ok(())
    }

    /// Swap in a new listener for a tree, dropping any previous one
    pub fn replace<F>(&self, trigger: &str, listener: F)
    where
        F: Fn(&Session, bool) + Send + Sync + 'static,
    {
        tracing::info!(trigger = %trigger, "Replaced session listener");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(trigger), Arc::new(listener));
    }

    /// Invoke the listener for the session's tree, if any. A panicking
    /// listener is logged and otherwise ignored.
    pub fn notify(&self, session: &Session, is_ending: bool) {
        let listener = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(&session.tree_trigger))
            .cloned();
        let Some(listener) = listener else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| listener(session, is_ending))).is_err() {
            tracing::error!(
                session_id = %session.id,
                trigger = %session.tree_trigger,
                is_ending,
                "Session listener panicked"
            );
        }
    }
}
