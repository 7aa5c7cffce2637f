use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{is_stop_phrase, ActiveAction, QueuedMessage, Session, SessionPermit, SessionRegistry};

/// What the caller should do with an inbound message.
#[derive(Debug)]
pub enum Dispatch {
    /// The message was a stop phrase. `cancelled` is true if an action was
    /// running and has been cancelled.
    Stopped { cancelled: bool },
    /// The caller now owns the session and must process the message.
    Run(ActiveRun),
    /// Another processor holds the session; the message waits in line.
    Queued { pending: usize },
}

/// Routes inbound messages through their session's single-flight lock.
///
/// `dispatch` and `ActiveRun::next` both hold the session's queue lock
/// while they look at the session lock and register the new action, so a
/// message queued just as the running processor finishes is always picked
/// up by one of them, and a queued message always cancels the action it
/// waits behind.
pub struct SessionGate {
    registry: Arc<SessionRegistry>,
}

impl SessionGate {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, key: &str, message: QueuedMessage) -> Dispatch {
        let session = self.registry.get_or_create(key).await;

        if is_stop_phrase(&message.content) {
            let cancelled = session.supervisor().stop().await;
            info!("Session {key}: stop requested (cancelled: {cancelled})");
            return Dispatch::Stopped { cancelled };
        }

        let mut queue = session.lock_queue().await;
        match session.try_acquire() {
            Some(permit) => {
                // Registered before the queue lock is released, so a message
                // dispatched right after this one can cancel it
                let action = session.supervisor().supersede().await;
                drop(queue);
                Dispatch::Run(ActiveRun {
                    session,
                    permit: Some(permit),
                    message,
                    action,
                })
            }
            None => {
                // Newest message wins: whatever is running now is cancelled
                let cancelled = session.supervisor().stop().await;
                queue.push_back(message);
                let pending = queue.len();
                debug!("Session {key}: busy, queued ({pending} pending, cancelled: {cancelled})");
                Dispatch::Queued { pending }
            }
        }
    }
}

/// Exclusive hold on a session while its messages are processed.
///
/// Call `next` after each message; it hands out queued messages in
/// arrival order and releases the session once the queue is empty.
/// Dropping an `ActiveRun` instead releases the session but leaves any
/// queued messages for the next dispatch.
#[derive(Debug)]
pub struct ActiveRun {
    session: Arc<Session>,
    permit: Option<SessionPermit>,
    message: QueuedMessage,
    action: ActiveAction,
}

impl ActiveRun {
    pub fn message(&self) -> &QueuedMessage {
        &self.message
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Fires when this message is superseded or stopped.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.action.cancel
    }

    /// Finishes the current message and moves on to the next queued one.
    pub async fn next(mut self) -> Option<ActiveRun> {
        self.session.supervisor().finish(&self.action.id).await;

        let mut queue = self.session.lock_queue().await;
        match queue.pop_front() {
            Some(message) => {
                let action = self.session.supervisor().supersede().await;
                drop(queue);
                Some(ActiveRun {
                    session: Arc::clone(&self.session),
                    permit: self.permit.take(),
                    message,
                    action,
                })
            }
            None => {
                // Release while still holding the queue lock
                drop(self.permit.take());
                drop(queue);
                debug!("Session {}: idle", self.session.key());
                None
            }
        }
    }
}
