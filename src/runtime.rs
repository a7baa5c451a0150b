//! Runtime for executing survey sessions
//!
//! Every connection gets its own actor task. Messages for one connection are
//! processed strictly in arrival order; different connections run in parallel.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConnectionRuntime;
pub use traits::*;

use crate::listeners::SessionListenerRegistry;
use crate::state_machine::{
    CloseReason, EngineContext, Inbound, Outcome, Session, TransitionError,
};
use crate::transport::ChannelTransport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};

/// Type alias for the production manager with concrete adapters
pub type ProductionManager = SessionManager<DatabaseStorage, ChannelTransport>;

/// How long a connection actor waits for work before shutting down
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Reply sent when an event fails for reasons the user cannot fix
pub const GENERIC_ERROR_REPLY: &str =
    "Sorry, something went wrong on our side. Please try again later.";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Runtime for connection {0} is not running")]
    RuntimeGone(String),
}

/// What happened while handling one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventReport {
    pub handled: bool,
    /// Replies in the order they were handed to the transport
    pub replies: Vec<String>,
    pub delivery_failures: usize,
}

impl EventReport {
    fn new(outcome: Outcome) -> Self {
        Self {
            handled: outcome == Outcome::Handled,
            ..Self::default()
        }
    }
}

/// Published whenever a session closes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEnded {
    pub session: Session,
    pub canceled: bool,
    pub reason: CloseReason,
    /// Text of the message that ended the session, if one did
    pub message: Option<String>,
}

impl SessionEnded {
    pub fn new(session: Session, message: Option<String>) -> Self {
        let reason = session.close_reason.unwrap_or(CloseReason::Canceled);
        Self {
            canceled: reason.canceled(),
            reason,
            session,
            message,
        }
    }
}

/// Work items for a connection actor
#[derive(Debug)]
pub(crate) enum Command {
    Incoming {
        inbound: Inbound,
        reply: oneshot::Sender<Result<EventReport, EngineError>>,
    },
    /// Timeout for `session_id`, honored only if it is still idle at `cutoff`
    Timeout {
        session_id: String,
        cutoff: DateTime<Utc>,
        reply: oneshot::Sender<Result<Option<EventReport>, EngineError>>,
    },
}

/// Handle to interact with a running connection actor
struct ConnectionHandle {
    command_tx: mpsc::Sender<Command>,
}

/// Entry point for all inbound traffic
pub struct SessionManager<S, T>
where
    S: Storage + Clone + 'static,
    T: Transport + 'static,
{
    context: Arc<EngineContext>,
    storage: S,
    transport: Arc<T>,
    listeners: Arc<SessionListenerRegistry>,
    ended_tx: broadcast::Sender<SessionEnded>,
    idle_timeout: Duration,
    runtimes: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
}

impl<S, T> SessionManager<S, T>
where
    S: Storage + Clone + 'static,
    T: Transport + 'static,
{
    pub fn new(
        context: EngineContext,
        storage: S,
        transport: Arc<T>,
        listeners: Arc<SessionListenerRegistry>,
    ) -> Self {
        let (ended_tx, _) = broadcast::channel(128);
        Self {
            context: Arc::new(context),
            storage,
            transport,
            listeners,
            ended_tx,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stop a connection's actor after it has had no work for `idle_timeout`
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Feed one inbound text message through the connection's actor
    ///
    /// Returns once the message has been fully processed, including delivery
    /// of every reply.
    pub async fn handle_incoming(
        &self,
        connection_id: &str,
        text: &str,
    ) -> Result<EventReport, EngineError> {
        let inbound = Inbound::new(connection_id, text);
        let (reply, rx) = oneshot::channel();
        self.dispatch(connection_id, Command::Incoming { inbound, reply })
            .await?;
        rx.await
            .map_err(|_| EngineError::RuntimeGone(connection_id.to_string()))?
    }

    /// Inject a timeout for `session` if it has not moved since `cutoff`
    ///
    /// Returns `None` when the session changed or closed before the actor
    /// got to it.
    pub async fn inject_timeout(
        &self,
        session: &Session,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<EventReport>, EngineError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Timeout {
            session_id: session.id.clone(),
            cutoff,
            reply,
        };
        self.dispatch(&session.connection_id, command).await?;
        rx.await
            .map_err(|_| EngineError::RuntimeGone(session.connection_id.clone()))?
    }

    /// Subscribe to session-ended events
    pub fn subscribe_session_ended(&self) -> broadcast::Receiver<SessionEnded> {
        self.ended_tx.subscribe()
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    #[cfg(test)]
    pub async fn runtime_count(&self) -> usize {
        self.runtimes.read().await.len()
    }

    async fn dispatch(&self, connection_id: &str, command: Command) -> Result<(), EngineError> {
        let tx = self.get_or_create(connection_id).await;
        match tx.send(command).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(command)) => {
                // The actor went idle or died (a panic inside an effect); start a fresh one
                tracing::debug!(connection_id = %connection_id, "Connection runtime gone, restarting");
                {
                    let mut runtimes = self.runtimes.write().await;
                    if runtimes
                        .get(connection_id)
                        .is_some_and(|h| h.command_tx.same_channel(&tx))
                    {
                        runtimes.remove(connection_id);
                    }
                }
                self.get_or_create(connection_id)
                    .await
                    .send(command)
                    .await
                    .map_err(|_| EngineError::RuntimeGone(connection_id.to_string()))
            }
        }
    }

    /// Get or create the actor for a connection
    async fn get_or_create(&self, connection_id: &str) -> mpsc::Sender<Command> {
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(connection_id) {
                return handle.command_tx.clone();
            }
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have started it while we waited for the lock
        if let Some(handle) = runtimes.get(connection_id) {
            return handle.command_tx.clone();
        }

        let (command_tx, command_rx) = mpsc::channel(32);
        let runtime = ConnectionRuntime::new(
            connection_id.to_string(),
            Arc::clone(&self.context),
            self.storage.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.listeners),
            self.ended_tx.clone(),
            command_rx,
            self.idle_timeout,
        );

        let conn_id = connection_id.to_string();
        let registry = Arc::clone(&self.runtimes);
        tokio::spawn(async move {
            runtime.run().await;
            // Only drop our own handle; a replacement may already be registered
            let mut runtimes = registry.write().await;
            if runtimes
                .get(&conn_id)
                .is_some_and(|h| h.command_tx.is_closed())
            {
                runtimes.remove(&conn_id);
            }
            tracing::debug!(connection_id = %conn_id, "Connection runtime finished");
        });

        runtimes.insert(
            connection_id.to_string(),
            ConnectionHandle {
                command_tx: command_tx.clone(),
            },
        );
        command_tx
    }
}
