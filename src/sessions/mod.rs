//! Session persistence.
//!
//! [`SessionStore`] is the only component that talks to persisted state. It
//! wraps a [`SessionBackend`] document store and turns every backend failure
//! into a logged, boolean (or `None`) outcome: a failing database degrades
//! durability, never the conversation in flight.
//!
//! Backends:
//! - [`InMemoryBackend`]: process-local map, used by default and in tests
//! - [`crate::sqlite_session::SqliteBackend`]: one JSON document per row

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Result, SwitchboardError};
use crate::session::{Session, SessionId, SessionStatus, DEFAULT_MAX_MESSAGES};

/// Whole-document session storage.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Insert or overwrite the document keyed by `session.id`.
    async fn put(&self, session: &Session) -> Result<()>;

    /// Fetch a document; `Ok(None)` when the id is unknown.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>>;
}

/// Process-local backend.
#[derive(Default, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<HashMap<SessionId, Session>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> SwitchboardError {
    SwitchboardError::Persistence("session map lock poisoned".to_string())
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn put(&self, session: &Session) -> Result<()> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        map.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>> {
        let map = self.inner.lock().map_err(poisoned)?;
        Ok(map.get(id).cloned())
    }
}

/// Best-effort persistence façade shared by every agent.
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    max_messages: usize,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

impl SessionStore {
    pub fn new(backend: impl SessionBackend + 'static, max_messages: usize) -> Self {
        Self {
            backend: Arc::new(backend),
            max_messages: max_messages.max(1),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new(), DEFAULT_MAX_MESSAGES)
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Create and persist a fresh idle session owned by `initial_agent`.
    ///
    /// The session is returned even when the write fails.
    pub async fn create(&self, initial_agent: &str) -> Session {
        let session = Session::new(initial_agent, self.max_messages);
        if let Err(e) = self.backend.put(&session).await {
            warn!(session_id = %session.id, error = %e, "failed to persist new session");
        } else {
            debug!(session_id = %session.id, agent = initial_agent, "session created");
        }
        session
    }

    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        match self.backend.get(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to load session");
                None
            }
        }
    }

    /// Overwrite the stored document. Last writer wins.
    pub async fn replace(&self, session: &Session) -> bool {
        match self.backend.put(session).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "failed to persist session");
                false
            }
        }
    }

    /// Read-modify-write of the status field; `false` when absent or on failure.
    pub async fn update_status(&self, id: &SessionId, status: SessionStatus) -> bool {
        let Some(mut session) = self.get(id).await else {
            return false;
        };
        session.set_status(status);
        self.replace(&session).await
    }

    pub async fn update_current_agent(&self, id: &SessionId, agent: &str) -> bool {
        let Some(mut session) = self.get(id).await else {
            return false;
        };
        session.set_current_agent(agent);
        self.replace(&session).await
    }
}
