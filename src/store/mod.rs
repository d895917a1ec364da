//! Session Store: an object-safe `async_trait` for the persistence
//! backend, plugged in at boot. The core holds no knowledge of a
//! backend's internals beyond this trait.

pub mod memory;
pub mod redis;
mod seal;

pub use seal::{open_sealed, seal};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::session::{Session, SessionType};

/// A best-effort prune guarded by a per-`(user_id, type)` cooldown.
pub const PRUNE_COOLDOWN_SECS: i64 = 60 * 60;

/// `"<prefix>.s.<uid>.<type>"` — the session map key.
pub fn session_map_key(prefix: &str, user_id: &str, session_type: &SessionType) -> String {
    format!("{prefix}.s.{user_id}.{session_type}")
}

/// `"<prefix>.e.<uid>.<type>"` — the expiration ordered-set key.
pub fn expiration_set_key(prefix: &str, user_id: &str, session_type: &SessionType) -> String {
    format!("{prefix}.e.{user_id}.{session_type}")
}

/// `"<prefix>.l.<uid>.<type>"` — the lock-version map key.
pub fn lock_map_key(prefix: &str, user_id: &str, session_type: &SessionType) -> String {
    format!("{prefix}.l.{user_id}.{session_type}")
}

/// `"<prefix>.pl.<uid>.<type>"` — the prune-lock key.
pub fn prune_lock_key(prefix: &str, user_id: &str, session_type: &SessionType) -> String {
    format!("{prefix}.pl.{user_id}.{session_type}")
}

/// Abstract operations for the session store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns `None` when no session exists, when the stored
    /// `user_id`/`type` don't match the caller's expectations (key
    /// collision), when at-rest integrity verification fails, or when
    /// `refresh_expires_at < now` (logically deleted per invariant 5).
    async fn get(
        &self,
        session_id: &str,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<Option<Session>, StoreError>;

    /// Runs the upsert protocol: optimistic-lock check, no-op on an
    /// already-expired session, then an atomic write of the
    /// session blob, expiration score and lock version with the
    /// collections' TTL raised (never lowered) to the new maximum.
    /// Returns [`StoreError::Conflict`] when `lock_version - 1` doesn't
    /// match what's stored; the Engine handles that case, it is never a
    /// surprise to callers further out.
    async fn upsert(&self, session: &Session) -> Result<(), StoreError>;

    /// Removes the session from all three collections atomically and
    /// recomputes the shared TTL from the remaining maximum score.
    async fn delete(
        &self,
        session_id: &str,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<(), StoreError>;

    async fn get_all(
        &self,
        user_id: &str,
        session_type: &SessionType,
    ) -> Result<Vec<Session>, StoreError>;

    async fn delete_all(&self, user_id: &str, session_type: &SessionType) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionType;

    #[test]
    fn key_layout_matches_spec_shape() {
        let uid = "42";
        let t = SessionType::Full;
        assert_eq!(session_map_key("charon", uid, &t), "charon.s.42.full");
        assert_eq!(expiration_set_key("charon", uid, &t), "charon.e.42.full");
        assert_eq!(lock_map_key("charon", uid, &t), "charon.l.42.full");
        assert_eq!(prune_lock_key("charon", uid, &t), "charon.pl.42.full");
    }
}
