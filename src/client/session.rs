use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::message::Message;

pub type SessionId = uuid::Uuid;

/// Serializable snapshot of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub timestamp: u64,
    pub model_identifier: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),
    #[error("failed to serialize session: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence collaborator for conversation snapshots.
pub trait SessionStore: Send + Sync {
    /// All sessions, newest first.
    fn list(&self) -> Vec<Session>;
    fn get(&self, id: SessionId) -> Option<Session>;
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the id is taken.
    fn create(&self, session: Session) -> Result<(), StoreError>;
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    fn update(&self, session: Session) -> Result<(), StoreError>;
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    fn delete(&self, id: SessionId) -> Result<(), StoreError>;
    /// Flip the archived flag, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    fn toggle_archive(&self, id: SessionId) -> Result<bool, StoreError>;

    /// Create or update.
    ///
    /// # Errors
    ///
    /// Propagates the underlying create/update error.
    fn save(&self, session: Session) -> Result<(), StoreError> {
        if self.get(session.id).is_some() {
            self.update(session)
        } else {
            self.create(session)
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<FxHashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sessions
    }

    fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().get(&id).cloned()
    }

    fn create(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists(session.id));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    fn update(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        let Some(existing) = sessions.get_mut(&session.id) else {
            return Err(StoreError::NotFound(session.id.to_string()));
        };
        *existing = session;
        Ok(())
    }

    fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        self.sessions
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn toggle_archive(&self, id: SessionId) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        session.archived = !session.archived;
        Ok(session.archived)
    }
}
