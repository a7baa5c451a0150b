//! Mock implementations for testing
//!
//! These mocks enable integration testing of the session manager without a
//! database or a real gateway.

use super::traits::*;
use super::SessionManager;
use crate::config::EngineConfig;
use crate::db::Entry;
use crate::listeners::SessionListenerRegistry;
use crate::matcher::{CustomMatcherRegistry, Matcher};
use crate::state_machine::{EngineContext, Session};
use crate::tagging::PendingNotification;
use crate::transport::TransportError;
use crate::tree::fixtures::survey_document;
use crate::tree::{TreeCatalog, TreeDocument};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// In-Memory Storage
// ============================================================================

/// Storage backed by plain collections
#[derive(Default)]
pub struct InMemoryStorage {
    sessions: Mutex<HashMap<String, Session>>,
    entries: Mutex<Vec<Entry>>,
    notifications: Mutex<Vec<PendingNotification>>,
    fail_writes: AtomicBool,
}

#[allow(dead_code)]
impl InMemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Insert or overwrite a session directly
    pub fn put_session(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<PendingNotification> {
        self.notifications.lock().unwrap().clone()
    }

    fn check_writable(&self) -> Result<(), String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err("storage is read-only".to_string())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for InMemoryStorage {
    async fn find_open_session(&self, connection_id: &str) -> Result<Option<Session>, String> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.connection_id == connection_id && s.is_open())
            .cloned())
    }

    async fn create_session(&self, session: &Session) -> Result<(), String> {
        self.check_writable()?;
        if self.find_open_session(&session.connection_id).await?.is_some() {
            return Err(format!(
                "connection {} already has an open session",
                session.connection_id
            ));
        }
        self.put_session(session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<(), String> {
        self.check_writable()?;
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(format!("Session not found: {}", session.id)),
        }
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, String> {
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }

    async fn find_sessions_idle_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Session>, String> {
        let mut idle: Vec<Session> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.is_open() && s.last_modified <= cutoff)
            .cloned()
            .collect();
        idle.sort_by_key(|s| s.last_modified);
        Ok(idle)
    }
}

#[async_trait]
impl EntryStore for InMemoryStorage {
    async fn append_entry(
        &self,
        session_id: &str,
        transition_id: &str,
        text: &str,
        tags: &[String],
    ) -> Result<Entry, String> {
        self.check_writable()?;
        let mut entries = self.entries.lock().unwrap();
        let sequence_id = entries
            .iter()
            .filter(|e| e.session_id == session_id)
            .map(|e| e.sequence_id)
            .max()
            .unwrap_or(0)
            + 1;
        let entry = Entry {
            id: i64::try_from(entries.len()).unwrap() + 1,
            session_id: session_id.to_string(),
            sequence_id,
            transition_id: transition_id.to_string(),
            text: text.to_string(),
            tags: tags.to_vec(),
            created_at: Utc::now(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entries(&self, session_id: &str) -> Result<Vec<Entry>, String> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationQueue for InMemoryStorage {
    async fn enqueue(&self, notification: &PendingNotification) -> Result<(), String> {
        self.check_writable()?;
        let mut queued = self.notifications.lock().unwrap();
        if !queued.contains(notification) {
            queued.push(notification.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Mock Transports
// ============================================================================

/// Transport that records every delivery
#[derive(Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything delivered so far as (connection, text)
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }

    /// Texts delivered to one connection
    pub fn texts_for(&self, connection_id: &str) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(conn, _)| conn == connection_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, connection_id: &str, text: &str) -> Result<(), TransportError> {
        self.delivered
            .lock()
            .unwrap()
            .push((connection_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Transport whose gateway is always down
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn deliver(&self, connection_id: &str, _text: &str) -> Result<(), TransportError> {
        Err(TransportError::Failed {
            connection_id: connection_id.to_string(),
            reason: "gateway unavailable".to_string(),
        })
    }
}

// ============================================================================
// Test Manager Builder
// ============================================================================

pub type TestManager<T> = SessionManager<Arc<InMemoryStorage>, T>;

/// Builder for session managers over in-memory storage
pub struct TestManagerBuilder {
    config: EngineConfig,
    custom: Arc<CustomMatcherRegistry>,
    listeners: Arc<SessionListenerRegistry>,
    storage: Arc<InMemoryStorage>,
    idle_timeout: Option<std::time::Duration>,
    document: TreeDocument,
}

#[allow(dead_code)]
impl TestManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            custom: Arc::new(CustomMatcherRegistry::new()),
            listeners: Arc::new(SessionListenerRegistry::new()),
            storage: InMemoryStorage::new(),
            idle_timeout: None,
            document: survey_document(),
        }
    }

    pub fn document(mut self, document: TreeDocument) -> Self {
        self.document = document;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: std::time::Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listeners(mut self, listeners: Arc<SessionListenerRegistry>) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn storage(mut self, storage: Arc<InMemoryStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn build<T: Transport + 'static>(self, transport: Arc<T>) -> TestManager<T> {
        let catalog = TreeCatalog::from_document(self.document).unwrap();
        let context = EngineContext::new(Arc::new(catalog), Matcher::new(self.custom), self.config);
        let manager = SessionManager::new(context, self.storage, transport, self.listeners);
        match self.idle_timeout {
            Some(idle_timeout) => manager.with_idle_timeout(idle_timeout),
            None => manager,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EngineError, GENERIC_ERROR_REPLY};
    use crate::state_machine::CloseReason;
    use chrono::Duration;

    fn manager() -> (TestManager<RecordingTransport>, Arc<InMemoryStorage>, Arc<RecordingTransport>) {
        let storage = InMemoryStorage::new();
        let transport = RecordingTransport::new();
        let manager = TestManagerBuilder::new()
            .storage(Arc::clone(&storage))
            .build(Arc::clone(&transport));
        (manager, storage, transport)
    }

    #[tokio::test]
    async fn test_in_memory_storage_sequences() {
        let storage = InMemoryStorage::new();
        let a = storage.append_entry("s-1", "t", "a", &[]).await.unwrap();
        let b = storage.append_entry("s-1", "t", "b", &[]).await.unwrap();
        let other = storage.append_entry("s-2", "t", "c", &[]).await.unwrap();
        assert_eq!((a.sequence_id, b.sequence_id, other.sequence_id), (1, 2, 1));
    }

    /// SURVEY scenario: trigger, answer, completion
    #[tokio::test]
    async fn test_survey_to_completion() {
        let (manager, storage, transport) = manager();
        let mut ended = manager.subscribe_session_ended();

        let report = manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        assert!(report.handled);
        assert_eq!(
            report.replies,
            vec!["Continue? yes/no\nno - stop here\nyes - keep going"]
        );

        let report = manager.handle_incoming("555-0100", "Yes").await.unwrap();
        assert_eq!(report.replies, vec!["Thanks!"]);
        assert_eq!(report.delivery_failures, 0);

        let event = ended.recv().await.unwrap();
        assert_eq!(event.reason, CloseReason::Completed);
        assert!(!event.canceled);
        assert_eq!(event.message.as_deref(), Some("Yes"));

        let entries = storage.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence_id, 1);
        assert_eq!(entries[0].transition_id, "root-yes");
        assert!(storage
            .find_open_session("555-0100")
            .await
            .unwrap()
            .is_none());
        assert_eq!(transport.texts_for("555-0100").len(), 2);
    }

    #[tokio::test]
    async fn test_unhandled_without_session() {
        let (manager, _, transport) = manager();
        let report = manager.handle_incoming("555-0100", "hello").await.unwrap();
        assert!(!report.handled);
        assert!(report.replies.is_empty());
        assert!(transport.delivered().is_empty());
    }

    /// End trigger scenario
    #[tokio::test]
    async fn test_end_trigger_cancels() {
        let (manager, storage, _) = manager();
        let mut ended = manager.subscribe_session_ended();

        manager.handle_incoming("555-0100", "survey").await.unwrap();
        let report = manager.handle_incoming("555-0100", "end").await.unwrap();
        assert_eq!(report.replies, vec!["Your session with 'SURVEY' has ended"]);

        let event = ended.recv().await.unwrap();
        assert!(event.canceled);
        assert_eq!(event.message.as_deref(), Some("end"));
        assert!(storage.entries().is_empty());
    }

    /// Generic invalid answer scenario
    #[tokio::test]
    async fn test_invalid_answer_reprompts() {
        let (manager, storage, _) = manager();
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();

        let report = manager.handle_incoming("555-0100", "maybe").await.unwrap();
        assert_eq!(
            report.replies,
            vec!["Not a valid answer. Choose one of the following.\nno - stop here\nyes - keep going"]
        );
        let session = storage.find_open_session("555-0100").await.unwrap().unwrap();
        assert_eq!(session.num_tries, 1);
        assert_eq!(session.state.as_deref(), Some("root"));
    }

    #[tokio::test]
    async fn test_trigger_preempts_with_listener_calls() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let listeners = Arc::new(SessionListenerRegistry::new());
        let recorded = Arc::clone(&calls);
        listeners
            .register("SURVEY", move |session: &Session, is_ending| {
                recorded
                    .lock()
                    .unwrap()
                    .push((session.id.clone(), is_ending));
            })
            .unwrap();

        let storage = InMemoryStorage::new();
        let manager = TestManagerBuilder::new()
            .storage(Arc::clone(&storage))
            .listeners(listeners)
            .build(RecordingTransport::new());
        let mut ended = manager.subscribe_session_ended();

        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        manager.handle_incoming("555-0100", "no").await.unwrap();
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();

        let event = ended.recv().await.unwrap();
        assert!(event.canceled);
        assert_eq!(event.message, None);

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(!calls[0].1);
        assert_eq!(calls[1], (calls[0].0.clone(), true));
        assert!(!calls[2].1);
        assert_ne!(calls[2].0, calls[0].0);

        let open = storage.find_open_session("555-0100").await.unwrap().unwrap();
        assert_eq!(open.state.as_deref(), Some("root"));
        assert_eq!(open.num_tries, 0);
    }

    #[tokio::test]
    async fn test_tag_notifications_when_enabled() {
        let storage = InMemoryStorage::new();
        let manager = TestManagerBuilder::new()
            .storage(Arc::clone(&storage))
            .config(EngineConfig {
                notifications_enabled: true,
                ..EngineConfig::default()
            })
            .build(RecordingTransport::new());

        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        manager.handle_incoming("555-0100", "no").await.unwrap();
        manager.handle_incoming("555-0100", "too long").await.unwrap();

        let mut recipients: Vec<(String, String)> = storage
            .notifications()
            .into_iter()
            .map(|n| (n.tag, n.recipient))
            .collect();
        recipients.sort();
        assert_eq!(
            recipients,
            vec![
                ("feedback".to_string(), "ops@example.org".to_string()),
                ("feedback".to_string(), "research@example.org".to_string()),
                ("positive".to_string(), "ops@example.org".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_notifications_when_disabled() {
        let (manager, storage, _) = manager();
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        manager.handle_incoming("555-0100", "yes").await.unwrap();
        assert_eq!(storage.entries().len(), 1);
        assert!(storage.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_fail_event() {
        let storage = InMemoryStorage::new();
        let manager = TestManagerBuilder::new()
            .storage(Arc::clone(&storage))
            .build(Arc::new(FailingTransport));

        let report = manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        assert!(report.handled);
        assert_eq!(report.delivery_failures, 1);
        assert!(storage
            .find_open_session("555-0100")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unknown_custom_matcher_replies_generic_error() {
        let mut doc = survey_document();
        doc.answers.push(crate::tree::Answer::custom("age", "is_age"));
        doc.transitions.insert(
            0,
            crate::tree::Transition {
                id: "root-age".to_string(),
                current_state: "root".to_string(),
                answer: "age".to_string(),
                next_state: "done".to_string(),
                tags: vec![],
                priority: 0,
            },
        );
        let context = EngineContext::new(
            Arc::new(TreeCatalog::from_document(doc).unwrap()),
            Matcher::new(Arc::new(CustomMatcherRegistry::new())),
            EngineConfig::default(),
        );
        let storage = InMemoryStorage::new();
        let transport = RecordingTransport::new();
        let manager = SessionManager::new(
            context,
            Arc::clone(&storage),
            Arc::clone(&transport),
            Arc::new(SessionListenerRegistry::new()),
        );

        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        let result = manager.handle_incoming("555-0100", "yes").await;
        assert!(matches!(result, Err(EngineError::Transition(_))));
        assert_eq!(
            transport.texts_for("555-0100").last().map(String::as_str),
            Some(GENERIC_ERROR_REPLY)
        );

        let session = storage.find_open_session("555-0100").await.unwrap().unwrap();
        assert_eq!(session.state.as_deref(), Some("root"));
        assert_eq!(session.num_tries, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_and_runtime_survives() {
        let (manager, storage, transport) = manager();
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();

        storage.fail_writes();
        let result = manager.handle_incoming("555-0100", "yes").await;
        assert!(matches!(result, Err(EngineError::Storage(_))));
        // The completion message is never sent for a session that did not close
        assert!(!transport.texts_for("555-0100").contains(&"Thanks!".to_string()));

        // Reads still work and the actor keeps serving the connection
        let report = manager.handle_incoming("555-0199", "hello").await.unwrap();
        assert!(!report.handled);
        let report = manager.handle_incoming("555-0100", "hello").await;
        assert!(report.is_err());
    }

    #[tokio::test]
    async fn test_storage_failure_still_answers_user() {
        let (manager, storage, transport) = manager();
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();

        storage.fail_writes();
        let result = manager.handle_incoming("555-0100", "maybe").await;
        assert!(matches!(result, Err(EngineError::Storage(_))));

        let texts = transport.texts_for("555-0100");
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[1], GENERIC_ERROR_REPLY);
        let session = storage.find_open_session("555-0100").await.unwrap().unwrap();
        assert_eq!(session.num_tries, 0);
    }

    async fn wait_for_runtimes(manager: &TestManager<RecordingTransport>, expected: usize) {
        for _ in 0..200 {
            if manager.runtime_count().await == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} runtimes, found {}",
            manager.runtime_count().await
        );
    }

    #[tokio::test]
    async fn test_idle_runtimes_are_released() {
        let storage = InMemoryStorage::new();
        let transport = RecordingTransport::new();
        let manager = TestManagerBuilder::new()
            .storage(Arc::clone(&storage))
            .idle_timeout(std::time::Duration::from_millis(20))
            .build(Arc::clone(&transport));

        for i in 0..50 {
            let report = manager
                .handle_incoming(&format!("555-{i:04}"), "hello")
                .await
                .unwrap();
            assert!(!report.handled);
        }
        wait_for_runtimes(&manager, 0).await;

        // A released connection picks up where it left off
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        wait_for_runtimes(&manager, 0).await;
        let report = manager.handle_incoming("555-0100", "yes").await.unwrap();
        assert_eq!(report.replies, vec!["Thanks!"]);
        assert_eq!(storage.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_injection_follows_no_match_path() {
        let (manager, storage, transport) = manager();
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        let session = storage.find_open_session("555-0100").await.unwrap().unwrap();

        let cutoff = session.last_modified + Duration::seconds(1);
        let report = manager.inject_timeout(&session, cutoff).await.unwrap().unwrap();
        assert!(report.replies[0].starts_with("Not a valid answer."));
        assert_eq!(transport.texts_for("555-0100").len(), 2);

        let after = storage.find_open_session("555-0100").await.unwrap().unwrap();
        assert_eq!(after.num_tries, 1);
    }

    #[tokio::test]
    async fn test_stale_timeout_is_skipped() {
        let (manager, storage, _) = manager();
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();
        let scanned = storage.find_open_session("555-0100").await.unwrap().unwrap();
        let cutoff = scanned.last_modified;

        // A live reply lands between the scan and the injection
        manager.handle_incoming("555-0100", "no").await.unwrap();
        assert!(manager.inject_timeout(&scanned, cutoff).await.unwrap().is_none());

        // A session that already closed is also left alone
        manager.handle_incoming("555-0100", "end").await.unwrap();
        assert!(manager.inject_timeout(&scanned, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connections_run_independently() {
        let (manager, storage, _) = manager();
        let manager = Arc::new(manager);

        let mut tasks = Vec::new();
        for i in 0..10 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                let conn = format!("555-01{i:02}");
                manager.handle_incoming(&conn, "SURVEY").await.unwrap();
                manager.handle_incoming(&conn, "no").await.unwrap();
                manager.handle_incoming(&conn, "because").await.unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().replies, vec!["Noted."]);
        }

        assert_eq!(storage.entries().len(), 20);
        assert!(storage.sessions().iter().all(|s| !s.is_open()));
    }

    #[tokio::test]
    async fn test_messages_on_one_connection_are_serialized() {
        let (manager, storage, _) = manager();
        let manager = Arc::new(manager);
        manager.handle_incoming("555-0100", "SURVEY").await.unwrap();

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.handle_incoming("555-0100", "no").await })
        };
        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.handle_incoming("555-0100", "no").await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // Whichever ran second saw the first's result: root -> why -> noted
        let entries = storage.entries();
        assert_eq!(entries.len(), 2);
        let mut sequence: Vec<i64> = entries.iter().map(|e| e.sequence_id).collect();
        sequence.sort_unstable();
        assert_eq!(sequence, vec![1, 2]);
        assert!(storage.sessions().iter().all(|s| !s.is_open()));
    }
}
