//! The persistent authentication record and its invariants.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// `expires_at` sentinel meaning "never expires".
pub const INFINITE: i64 = i64::MAX;

/// Tags a session's namespace: a user can hold one session of each type
/// at once without the two colliding on `(user_id, type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Full,
    Custom(String),
}

impl Default for SessionType {
    fn default() -> Self {
        SessionType::Full
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::Full => write!(f, "full"),
            SessionType::Custom(tag) => write!(f, "{tag}"),
        }
    }
}

impl From<&str> for SessionType {
    fn from(value: &str) -> Self {
        if value.is_empty() || value == "full" {
            SessionType::Full
        } else {
            SessionType::Custom(value.to_string())
        }
    }
}

/// How a session's token signature reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Bearer,
    Cookie,
}

impl Default for TransportMode {
    fn default() -> Self {
        TransportMode::Bearer
    }
}

/// The persistent authentication record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub created_at: i64,
    pub refreshed_at: i64,
    /// `expires_at` may be [`INFINITE`].
    pub expires_at: i64,
    pub refresh_expires_at: i64,
    pub refresh_token_id: String,
    pub tokens_fresh_from: i64,
    /// 0 means no prior generation exists yet.
    pub prev_tokens_fresh_from: i64,
    pub lock_version: u64,
    pub extra_payload: HashMap<String, serde_json::Value>,
    pub transport: TransportMode,
}

impl Session {
    /// `refresh_expires_at = min(expires_at, refreshed_at + refresh_token_ttl)`.
    /// Re-applied on every window slide, not just at creation.
    pub fn compute_refresh_expires_at(
        expires_at: i64,
        from: i64,
        refresh_token_ttl_secs: i64,
    ) -> i64 {
        let candidate = from.saturating_add(refresh_token_ttl_secs);
        if expires_at == INFINITE {
            candidate
        } else {
            expires_at.min(candidate)
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.refresh_expires_at < now
    }

    /// True when `token_iat` falls in the grace window
    /// `[prev_tokens_fresh_from, tokens_fresh_from)`.
    /// `prev_tokens_fresh_from == 0` means there is no prior generation, so
    /// nothing before `tokens_fresh_from` is ever in-window.
    pub fn is_previous_generation(&self, token_iat: i64) -> bool {
        self.prev_tokens_fresh_from != 0
            && token_iat >= self.prev_tokens_fresh_from
            && token_iat < self.tokens_fresh_from
    }

    pub fn is_current_generation(&self, token_iat: i64) -> bool {
        token_iat >= self.tokens_fresh_from
    }

    pub fn is_stale(&self, token_iat: i64) -> bool {
        !self.is_current_generation(token_iat) && !self.is_previous_generation(token_iat)
    }

    /// Checks the session's field-ordering invariant: used in tests and
    /// as a debug assertion point for store implementations.
    pub fn check_ordering_invariant(&self) -> bool {
        self.created_at <= self.refreshed_at
            && self.refreshed_at <= self.refresh_expires_at
            && (self.expires_at == INFINITE || self.refresh_expires_at <= self.expires_at)
            && self.prev_tokens_fresh_from <= self.tokens_fresh_from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_expires_at_is_capped_by_absolute_expiry() {
        let from = 1_000;
        assert_eq!(
            Session::compute_refresh_expires_at(1_500, from, 1_000),
            1_500
        );
        assert_eq!(
            Session::compute_refresh_expires_at(3_000, from, 1_000),
            2_000
        );
        assert_eq!(
            Session::compute_refresh_expires_at(INFINITE, from, 1_000),
            2_000
        );
    }

    #[test]
    fn generation_classification() {
        let session = Session {
            id: "s1".into(),
            user_id: "1".into(),
            session_type: SessionType::Full,
            created_at: 0,
            refreshed_at: 100,
            expires_at: INFINITE,
            refresh_expires_at: 10_000,
            refresh_token_id: "rid2".into(),
            tokens_fresh_from: 100,
            prev_tokens_fresh_from: 50,
            lock_version: 2,
            extra_payload: HashMap::new(),
            transport: TransportMode::Bearer,
        };

        assert!(session.is_current_generation(100));
        assert!(session.is_current_generation(150));
        assert!(session.is_previous_generation(50));
        assert!(session.is_previous_generation(99));
        assert!(session.is_stale(49));
        assert!(!session.is_stale(50));
    }

    #[test]
    fn no_prior_generation_when_prev_is_zero() {
        let session = Session {
            id: "s1".into(),
            user_id: "1".into(),
            session_type: SessionType::Full,
            created_at: 0,
            refreshed_at: 0,
            expires_at: INFINITE,
            refresh_expires_at: 10_000,
            refresh_token_id: "rid1".into(),
            tokens_fresh_from: 0,
            prev_tokens_fresh_from: 0,
            lock_version: 1,
            extra_payload: HashMap::new(),
            transport: TransportMode::Bearer,
        };
        assert!(!session.is_previous_generation(0));
        assert!(session.is_current_generation(0));
    }
}
