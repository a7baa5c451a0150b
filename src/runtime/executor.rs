//! Connection runtime executor

use super::traits::{Storage, Transport};
use super::{Command, EngineError, EventReport, SessionEnded, GENERIC_ERROR_REPLY};

use crate::listeners::SessionListenerRegistry;
use crate::state_machine::{transition, Effect, EngineContext, Inbound};
use crate::tagging::notifications_for;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Actor that owns all processing for one connection
pub struct ConnectionRuntime<S, T>
where
    S: Storage + Clone + 'static,
    T: Transport + 'static,
{
    connection_id: String,
    context: Arc<EngineContext>,
    storage: S,
    transport: Arc<T>,
    listeners: Arc<SessionListenerRegistry>,
    ended_tx: broadcast::Sender<SessionEnded>,
    command_rx: mpsc::Receiver<Command>,
    idle_timeout: Duration,
}

impl<S, T> ConnectionRuntime<S, T>
where
    S: Storage + Clone + 'static,
    T: Transport + 'static,
{
    pub(crate) fn new(
        connection_id: String,
        context: Arc<EngineContext>,
        storage: S,
        transport: Arc<T>,
        listeners: Arc<SessionListenerRegistry>,
        ended_tx: broadcast::Sender<SessionEnded>,
        command_rx: mpsc::Receiver<Command>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            context,
            storage,
            transport,
            listeners,
            ended_tx,
            command_rx,
            idle_timeout,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(connection_id = %self.connection_id, "Starting connection runtime");

        loop {
            let next = tokio::time::timeout(self.idle_timeout, self.command_rx.recv()).await;
            match next {
                Ok(Some(command)) => self.handle_command(command).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new work, then drain anything that raced in
                    self.command_rx.close();
                    while let Some(command) = self.command_rx.recv().await {
                        self.handle_command(command).await;
                    }
                    tracing::debug!(connection_id = %self.connection_id, "Connection runtime idle");
                    break;
                }
            }
        }

        tracing::debug!(connection_id = %self.connection_id, "Connection runtime stopped");
    }

    async fn handle_command(&self, command: Command) {
        match command {
            Command::Incoming { inbound, reply } => {
                let result = self.process_event(inbound).await;
                if let Err(e) = &result {
                    tracing::error!(connection_id = %self.connection_id, error = %e, "Error handling message");
                }
                let _ = reply.send(result);
            }
            Command::Timeout {
                session_id,
                cutoff,
                reply,
            } => {
                let result = self.process_timeout(&session_id, cutoff).await;
                if let Err(e) = &result {
                    tracing::error!(connection_id = %self.connection_id, error = %e, "Error handling timeout");
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn process_timeout(
        &self,
        session_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<EventReport>, EngineError> {
        let current = self
            .storage
            .find_open_session(&self.connection_id)
            .await
            .map_err(EngineError::Storage)?;

        // A live message may have moved or closed the session since the scan
        let still_idle = current
            .as_ref()
            .is_some_and(|s| s.id == session_id && s.last_modified <= cutoff);
        if !still_idle {
            tracing::debug!(
                connection_id = %self.connection_id,
                session_id = %session_id,
                "Skipping stale timeout"
            );
            return Ok(None);
        }

        tracing::info!(connection_id = %self.connection_id, session_id = %session_id, "Session timed out");
        self.process_event(Inbound::timeout(self.connection_id.clone()))
            .await
            .map(Some)
    }

    async fn process_event(&self, inbound: Inbound) -> Result<EventReport, EngineError> {
        // Storage is the source of truth; reload on every event
        let session = self
            .storage
            .find_open_session(&self.connection_id)
            .await
            .map_err(EngineError::Storage)?;

        // Pure state transition
        let result = match transition(session.as_ref(), &self.context, &inbound) {
            Ok(r) => r,
            Err(e) => {
                // Configuration problem, not the user's fault; tell them something
                let mut report = EventReport {
                    handled: true,
                    ..EventReport::default()
                };
                self.deliver(GENERIC_ERROR_REPLY, &mut report).await;
                return Err(e.into());
            }
        };

        let mut report = EventReport::new(result.outcome);
        for effect in result.effects {
            if let Err(e) = self.execute_effect(effect, &mut report).await {
                // Writes come before replies, so nothing misleading went out yet
                self.deliver(GENERIC_ERROR_REPLY, &mut report).await;
                return Err(e);
            }
        }

        if report.delivery_failures > 0 {
            tracing::warn!(
                connection_id = %self.connection_id,
                failures = report.delivery_failures,
                "Some replies were not delivered"
            );
        }
        Ok(report)
    }

    async fn execute_effect(
        &self,
        effect: Effect,
        report: &mut EventReport,
    ) -> Result<(), EngineError> {
        match effect {
            Effect::CreateSession { session } => {
                tracing::info!(
                    connection_id = %self.connection_id,
                    session_id = %session.id,
                    tree = %session.tree_trigger,
                    "Session started"
                );
                self.storage
                    .create_session(&session)
                    .await
                    .map_err(EngineError::Storage)
            }

            Effect::PersistSession { session } => self
                .storage
                .update_session(&session)
                .await
                .map_err(EngineError::Storage),

            Effect::RecordEntry {
                session_id,
                transition_id,
                text,
                tags,
            } => {
                let entry = self
                    .storage
                    .append_entry(&session_id, &transition_id, &text, &tags)
                    .await
                    .map_err(EngineError::Storage)?;
                tracing::debug!(
                    session_id = %session_id,
                    sequence_id = entry.sequence_id,
                    transition = %transition_id,
                    "Entry recorded"
                );

                if !self.context.config.notifications_enabled {
                    return Ok(());
                }
                let catalog = &self.context.catalog;
                let pending = notifications_for(&entry, tags.iter().filter_map(|t| catalog.tag(t)));
                for notification in &pending {
                    self.storage
                        .enqueue(notification)
                        .await
                        .map_err(EngineError::Storage)?;
                }
                Ok(())
            }

            Effect::NotifyListeners { session, is_ending } => {
                self.listeners.notify(&session, is_ending);
                Ok(())
            }

            Effect::SessionEnded { session, message } => {
                let event = SessionEnded::new(session, message);
                tracing::info!(
                    connection_id = %self.connection_id,
                    session_id = %event.session.id,
                    reason = %event.reason,
                    canceled = event.canceled,
                    "Session ended"
                );
                // Nobody listening is fine
                let _ = self.ended_tx.send(event);
                Ok(())
            }

            Effect::Reply { text } => {
                self.deliver(&text, report).await;
                Ok(())
            }

            Effect::ReportFault { session_id, fault } => {
                tracing::error!(
                    connection_id = %self.connection_id,
                    session_id = %session_id,
                    fault = %fault,
                    "Tree integrity fault"
                );
                Ok(())
            }
        }
    }

    async fn deliver(&self, text: &str, report: &mut EventReport) {
        if let Err(e) = self.transport.deliver(&self.connection_id, text).await {
            tracing::warn!(connection_id = %self.connection_id, error = %e, "Reply delivery failed");
            report.delivery_failures += 1;
        }
        report.replies.push(text.to_string());
    }
}
