//! Timeout sweeper
//!
//! Periodically looks for open sessions that have been idle longer than the
//! configured timeout and pushes a synthetic timeout message through the
//! owning connection's actor.

use crate::runtime::{EngineError, SessionManager, SessionStore, Storage, Transport};
use crate::state_machine::Session;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct TimeoutSweeper<S, T>
where
    S: Storage + Clone + 'static,
    T: Transport + 'static,
{
    manager: Arc<SessionManager<S, T>>,
    timeout: chrono::Duration,
    interval: Duration,
}

impl<S, T> TimeoutSweeper<S, T>
where
    S: Storage + Clone + 'static,
    T: Transport + 'static,
{
    pub fn new(manager: Arc<SessionManager<S, T>>, timeout: Duration, interval: Duration) -> Self {
        Self {
            manager,
            timeout: chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX),
            interval,
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Time out `session` if it has been idle for at least the timeout
    ///
    /// Waits until the timeout has been fully processed. Returns whether a
    /// timeout was actually applied.
    pub async fn tick(&self, session: &Session, now: DateTime<Utc>) -> Result<bool, EngineError> {
        if now - session.last_modified < self.timeout {
            return Ok(false);
        }
        let cutoff = self.cutoff(now);
        let report = self.manager.inject_timeout(session, cutoff).await?;
        Ok(report.is_some())
    }

    /// One pass over every idle session. Returns how many were timed out.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let now = Utc::now();
        let idle = self
            .manager
            .storage()
            .find_sessions_idle_since(self.cutoff(now))
            .await
            .map_err(EngineError::Storage)?;

        let mut injected = 0;
        for session in &idle {
            match self.tick(session, now).await {
                Ok(true) => injected += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(session_id = %session.id, error = %e, "Failed to time out session");
                }
            }
        }

        if injected > 0 {
            tracing::info!(candidates = idle.len(), injected, "Timeout sweep finished");
        }
        Ok(injected)
    }

    /// Sweep on a fixed interval until `cancel` fires
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                timeout_secs = self.timeout.num_seconds(),
                "Timeout sweeper started"
            );

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.sweep().await {
                            tracing::error!(error = %e, "Timeout sweep failed");
                        }
                    }
                }
            }

            tracing::info!("Timeout sweeper stopped");
        })
    }
}
