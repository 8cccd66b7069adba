use tokio::sync::watch;

use super::reducer::{apply_event, WorkflowEvent};
use super::session::Session;

/// The single owner of a session's state.
///
/// Mutations go through [`dispatch`](Self::dispatch); every change is
/// published to subscribers as a fresh snapshot.
#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<Session>,
}

impl SessionStore {
    /// Wrap an initial session.
    pub fn new(session: Session) -> Self {
        let (tx, _rx) = watch::channel(session);
        Self { tx }
    }

    /// Apply one event.
    pub fn dispatch(&self, event: WorkflowEvent) {
        self.tx.send_modify(|session| apply_event(session, event));
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Read the current state without cloning it.
    pub fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }
}
