//! Sessions kept for later retrieval by id.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::session::RecordingSession;
use crate::error::{ScanError, ScanResult};

/// A session shared between its creator and the registry.
pub type SharedSession = Arc<Mutex<RecordingSession>>;

/// Recording sessions keyed by their UUID.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    sessions: BTreeMap<Uuid, SharedSession>,
}

impl RecordingRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `session` under its id and hand back a shared reference.
    pub fn insert(&mut self, session: RecordingSession) -> SharedSession {
        let id = session.id();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.insert(id, shared.clone());
        shared
    }

    /// Session kept under `id`.
    pub fn find(&self, id: Uuid) -> ScanResult<SharedSession> {
        self.sessions
            .get(&id)
            .cloned()
            .ok_or(ScanError::SessionNotFound(id))
    }

    /// Drop the session kept under `id`.
    pub fn remove(&mut self, id: Uuid) -> ScanResult<()> {
        self.sessions
            .remove(&id)
            .map(|_| ())
            .ok_or(ScanError::SessionNotFound(id))
    }

    /// Whether a session is kept under `id`.
    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Ids of all kept sessions, in no particular order.
    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.keys().copied().collect()
    }

    /// Number of kept sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is kept.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
