use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::session::BatchSession;
use crate::stats::StatusSnapshot;

const SESSION_ID_LEN: usize = 24;

/// Host-owned store of batch sessions keyed by session id.
///
/// Expiry is left to the host: sessions stay until [`SessionRegistry::remove`].
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<BatchSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh session with its own provider chain and registers it.
    pub fn create(&self, config: &AppConfig) -> AppResult<Arc<BatchSession>> {
        let session = Arc::new(BatchSession::from_config(new_session_id(), config)?);
        self.insert(Arc::clone(&session));
        Ok(session)
    }

    pub fn insert(&self, session: Arc<BatchSession>) {
        debug!(session = session.id(), "session registered");
        self.sessions
            .write()
            .insert(session.id().to_string(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<BatchSession>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<BatchSession>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            debug!(session = id, "session removed");
        }
        removed
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn status(&self, id: &str) -> AppResult<StatusSnapshot> {
        self.get(id)
            .map(|session| session.snapshot())
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))
    }

    pub fn cancel(&self, id: &str) -> AppResult<()> {
        let session = self
            .get(id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        session.cancel();
        Ok(())
    }
}

fn new_session_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::test_config;
    use crate::stats::SessionState;

    #[test]
    fn creates_sessions_with_distinct_ids() {
        let registry = SessionRegistry::new();
        let config = test_config("http://census", "http://nominatim");

        let first = registry.create(&config).unwrap();
        let second = registry.create(&config).unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.id().len(), SESSION_ID_LEN);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.status(first.id()).unwrap().state, SessionState::Created);
    }

    #[test]
    fn cancels_and_removes_by_id() {
        let registry = SessionRegistry::new();
        let config = test_config("http://census", "http://nominatim");
        let session = registry.create(&config).unwrap();
        let id = session.id().to_string();

        registry.cancel(&id).unwrap();
        assert!(session.is_cancelled());

        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.status(&id),
            Err(AppError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.cancel(&id),
            Err(AppError::SessionNotFound(_))
        ));
    }

    #[test]
    fn clones_share_the_same_store() {
        let registry = SessionRegistry::new();
        let handle = registry.clone();
        let config = test_config("http://census", "http://nominatim");
        let session = registry.create(&config).unwrap();

        assert_eq!(handle.ids(), vec![session.id().to_string()]);
        assert!(handle.get(session.id()).is_some());
    }
}
