//! Per-conversation concurrency gate.
//!
//! Every conversation (chat channel, DM, ...) maps to one `Session`. At
//! most one processor holds a session at a time; messages arriving while
//! it is held wait in a FIFO queue. A new message cancels the in-flight
//! action (supersede), and a stop phrase cancels it without starting
//! anything.

mod gate;
mod supervisor;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard, RwLock};
use tracing::debug;

pub use gate::{ActiveRun, Dispatch, SessionGate};
pub use supervisor::{is_stop_phrase, ActiveAction, SessionSupervisor, STOP_PHRASES};

/// An inbound message waiting for the session.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub content: String,
    /// Attachment references (paths or URLs), opaque to the gate
    pub media: Vec<String>,
    /// Whether the sender is allowed to trigger privileged actions
    pub trusted: bool,
}

impl QueuedMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media: Vec::new(),
            trusted: false,
        }
    }

    pub fn trusted(mut self) -> Self {
        self.trusted = true;
        self
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Proof of holding a session. Dropping it releases the session.
#[derive(Debug)]
pub struct SessionPermit {
    _guard: OwnedMutexGuard<()>,
}

impl SessionPermit {
    pub fn release(self) {}
}

#[derive(Debug)]
pub struct Session {
    key: String,
    busy: Arc<Mutex<()>>,
    queue: Mutex<VecDeque<QueuedMessage>>,
    history: Mutex<Vec<ChatMessage>>,
    supervisor: SessionSupervisor,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            busy: Arc::new(Mutex::new(())),
            queue: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            supervisor: SessionSupervisor::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Non-blocking attempt to become the session's only processor.
    pub fn try_acquire(&self) -> Option<SessionPermit> {
        Arc::clone(&self.busy)
            .try_lock_owned()
            .ok()
            .map(|guard| SessionPermit { _guard: guard })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.try_lock().is_err()
    }

    pub async fn queue(&self, message: QueuedMessage) {
        let mut queue = self.queue.lock().await;
        queue.push_back(message);
        debug!("Session {}: queued message ({} pending)", self.key, queue.len());
    }

    pub async fn dequeue(&self) -> Option<QueuedMessage> {
        self.queue.lock().await.pop_front()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub(crate) async fn lock_queue(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.queue.lock().await
    }

    pub async fn push_message(&self, role: Role, content: impl Into<String>) {
        self.history.lock().await.push(ChatMessage {
            role,
            content: content.into(),
            at: Utc::now(),
        });
    }

    /// The last `limit` messages, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<ChatMessage> {
        let history = self.history.lock().await;
        let start = history.len().saturating_sub(limit);
        history[start..].to_vec()
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }
}

/// Session table keyed by an opaque session key.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Returns the session for `key`, creating it on first reference.
    pub async fn get_or_create(&self, key: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(key) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        // Another caller may have inserted between the two locks
        Arc::clone(sessions.entry(key.to_string()).or_insert_with(|| {
            debug!("Session created: {key}");
            Arc::new(Session::new(key))
        }))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_single_flight() {
        let session = Session::new("chat-1");
        let permit = session.try_acquire().expect("first acquire");
        assert!(session.try_acquire().is_none());
        assert!(session.is_busy());

        permit.release();
        assert!(!session.is_busy());
        assert!(session.try_acquire().is_some());
    }

    #[test]
    fn test_permit_drop_releases() {
        let session = Session::new("chat-1");
        {
            let _permit = session.try_acquire().unwrap();
            assert!(session.try_acquire().is_none());
        }
        assert!(session.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_queue_fifo() {
        let session = Session::new("chat-1");
        assert_eq!(session.dequeue().await, None);

        session.queue(QueuedMessage::new("one")).await;
        session.queue(QueuedMessage::new("two").trusted()).await;
        assert_eq!(session.queue_len().await, 2);

        assert_eq!(session.dequeue().await.unwrap().content, "one");
        let second = session.dequeue().await.unwrap();
        assert_eq!(second.content, "two");
        assert!(second.trusted);
        assert_eq!(session.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_second_message_waits_for_release() {
        let session = Session::new("chat-1");
        let first = session.try_acquire().unwrap();

        // Second message arrives while the first is still running
        assert!(session.try_acquire().is_none());
        session.queue(QueuedMessage::new("second")).await;

        first.release();
        let next = session.try_acquire().unwrap();
        assert_eq!(session.dequeue().await.unwrap().content, "second");
        drop(next);
    }

    #[tokio::test]
    async fn test_history_limit() {
        let session = Session::new("chat-1");
        for i in 0..5 {
            session.push_message(Role::User, format!("m{i}")).await;
        }
        session.push_message(Role::Assistant, "reply").await;

        let last = session.history(2).await;
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].content, "m4");
        assert_eq!(last[1].role, Role::Assistant);
        assert_eq!(session.history(100).await.len(), 6);
        assert!(session.history(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_registry_reuses_sessions() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty().await);
        let a = registry.get_or_create("telegram:42").await;
        let b = registry.get_or_create("telegram:42").await;
        let c = registry.get_or_create("discord:7").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len().await, 2);
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registry_concurrent_first_access() {
        let registry = Arc::new(SessionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_or_create("shared").await
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.len().await, 1);
    }
}
