//! An in-process `SessionStore`: a `RwLock`-guarded `HashMap` standing
//! in for the real backend. Used by the engine/pipeline tests in this
//! crate and by hosts that don't need cross-process session sharing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::session::{Session, SessionType};
use crate::store::SessionStore;

type Key = (String, SessionType, String);

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Key, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user_id: &str, session_type: &SessionType, session_id: &str) -> Key {
        (user_id.to_string(), session_type.clone(), session_id.to_string())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(
        &self,
        session_id: &str,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<Option<Session>, StoreError> {
        let now = Utc::now().timestamp();
        let guard = self.sessions.read().unwrap();
        let found = guard.get(&Self::key(user_id, session_type, session_id));
        match found {
            Some(session)
                if session.user_id == user_id
                    && session.session_type == *session_type
                    && !session.is_expired(now) =>
            {
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let mut guard = self.sessions.write().unwrap();
        let key = Self::key(&session.user_id, &session.session_type, &session.id);

        if let Some(existing) = guard.get(&key) {
            if existing.lock_version != session.lock_version.saturating_sub(1) {
                return Err(StoreError::Conflict);
            }
        } else if session.lock_version != 1 {
            return Err(StoreError::Conflict);
        }

        if session.is_expired(now) {
            return Ok(());
        }

        guard.insert(key, session.clone());
        Ok(())
    }

    async fn delete(
        &self,
        session_id: &str,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<(), StoreError> {
        let mut guard = self.sessions.write().unwrap();
        guard.remove(&Self::key(user_id, session_type, session_id));
        Ok(())
    }

    async fn get_all(
        &self,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<Vec<Session>, StoreError> {
        let now = Utc::now().timestamp();
        let guard = self.sessions.read().unwrap();
        Ok(guard
            .values()
            .filter(|s| s.user_id == user_id && s.session_type == *session_type && !s.is_expired(now))
            .cloned()
            .collect())
    }

    async fn delete_all(&self, user_id: &str, session_type: &SessionType) -> Result<(), StoreError> {
        let mut guard = self.sessions.write().unwrap();
        guard.retain(|(uid, styp, _), _| !(uid == user_id && styp == session_type));
        Ok(())
    }
}
