use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Messages that cancel the in-flight action instead of starting a new one.
pub const STOP_PHRASES: &[&str] = &[
    "stop",
    "cancel",
    "abort",
    "nevermind",
    "never mind",
    "quit",
    "halt",
];

/// Exact, case-insensitive match after trimming. "stop the build" is a
/// request, not a stop phrase.
pub fn is_stop_phrase(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    STOP_PHRASES.contains(&normalized.as_str())
}

/// The action currently running for a session.
#[derive(Debug, Clone)]
pub struct ActiveAction {
    pub id: String,
    pub cancel: CancellationToken,
}

/// Owns at most one live action per session.
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    active: Mutex<Option<ActiveAction>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever is running and registers a new action.
    pub async fn supersede(&self) -> ActiveAction {
        let next = ActiveAction {
            id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        };
        let mut active = self.active.lock().await;
        if let Some(previous) = active.replace(next.clone()) {
            debug!("Superseding action {}", previous.id);
            previous.cancel.cancel();
        }
        next
    }

    /// Cancels the running action, if any. Returns whether one was running.
    pub async fn stop(&self) -> bool {
        match self.active.lock().await.take() {
            Some(previous) => {
                debug!("Stopping action {}", previous.id);
                previous.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Clears the slot if `id` is still the registered action. A finished
    /// action that was already superseded leaves its successor alone.
    pub async fn finish(&self, id: &str) {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }
}
