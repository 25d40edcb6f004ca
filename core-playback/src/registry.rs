//! # Session Registry
//!
//! Maps session ids to running session actors. This map is the only state
//! shared across sessions; everything else lives inside an actor.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::player::{SessionContext, SessionHandle, SessionPlayer};
use crate::track::SessionId;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    context: SessionContext,
}

impl SessionRegistry {
    pub fn new(context: SessionContext) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            context,
        }
    }

    /// Handle for `id`, spawning the session on first use.
    ///
    /// A handle whose actor has died is replaced by a fresh session.
    pub fn get_or_create(&self, id: SessionId) -> SessionHandle {
        if let Some(handle) = self.sessions.read().get(&id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let mut sessions = self.sessions.write();
        match sessions.get(&id) {
            Some(handle) if !handle.is_closed() => handle.clone(),
            _ => {
                info!(session_id = id.0, "Creating session");
                let handle = SessionPlayer::spawn(id, self.context.clone());
                sessions.insert(id, handle.clone());
                handle
            }
        }
    }

    /// Existing session only; never creates one.
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .read()
            .get(&id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Tear down one session. Returns `false` if it did not exist.
    pub async fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id);
        match removed {
            Some(handle) => {
                if let Err(error) = handle.shutdown().await {
                    debug!(session_id = id.0, error = %error, "Session already closed");
                }
                info!(session_id = id.0, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Tear down every session.
    pub async fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .write()
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        info!(count = handles.len(), "Shutting down all sessions");
        for handle in handles {
            handle.shutdown().await.ok();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
