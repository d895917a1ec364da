//! Configuration surface, loaded with `std::env::var` plus `.ok()` +
//! `.and_then(...parse...)` + `.unwrap_or(default)` for optional
//! numeric knobs, and `.expect("... must be set")` for the one
//! required key — a missing required key is a fatal startup error,
//! not a recoverable `Result`.

use std::collections::HashMap;

const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 900;
const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 60 * 24 * 60 * 60;
const DEFAULT_SESSION_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Cookie attributes for a signature cookie (`access_cookie_opts` /
/// `refresh_cookie_opts`).
#[derive(Debug, Clone)]
pub struct CookieOpts {
    pub http_only: bool,
    pub same_site: String,
    pub secure: bool,
    pub path: String,
    pub max_age_secs: u64,
}

impl CookieOpts {
    pub fn defaults(max_age_secs: u64) -> Self {
        Self {
            http_only: true,
            same_site: "Strict".to_string(),
            secure: true,
            path: "/".to_string(),
            max_age_secs,
        }
    }
}

/// The configuration surface consumed by [`crate::engine::SessionEngine`],
/// [`crate::transport::SignatureTransport`] and
/// [`crate::store::redis::RedisSessionStore`].
#[derive(Debug, Clone)]
pub struct CharonConfig {
    pub token_issuer: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub session_ttl_secs: i64,
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub access_cookie_opts: CookieOpts,
    pub refresh_cookie_opts: CookieOpts,
    /// Module-specific config for optional collaborators (TOTP, GraphQL
    /// middleware, etc) that this crate does not interpret itself.
    pub optional_modules: HashMap<String, serde_json::Value>,
}

impl CharonConfig {
    /// Loads the surface from environment variables. Panics (refuses to
    /// start) if `TOKEN_ISSUER` is unset — a missing required key is
    /// fatal, never a degraded default.
    pub fn from_env() -> Self {
        let token_issuer = std::env::var("TOKEN_ISSUER")
            .expect("TOKEN_ISSUER environment variable must be set for token issuance");

        let access_token_ttl_secs = std::env::var("ACCESS_TOKEN_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECS);

        let refresh_token_ttl_secs = std::env::var("REFRESH_TOKEN_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFRESH_TOKEN_TTL_SECS);

        let session_ttl_secs = std::env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);

        let access_cookie_name = std::env::var("ACCESS_COOKIE_NAME")
            .unwrap_or_else(|_| "_access_token_signature".to_string());
        let refresh_cookie_name = std::env::var("REFRESH_COOKIE_NAME")
            .unwrap_or_else(|_| "_refresh_token_signature".to_string());

        Self {
            token_issuer,
            access_token_ttl_secs,
            refresh_token_ttl_secs,
            session_ttl_secs,
            access_cookie_opts: CookieOpts::defaults(access_token_ttl_secs as u64),
            refresh_cookie_opts: CookieOpts::defaults(refresh_token_ttl_secs as u64),
            access_cookie_name,
            refresh_cookie_name,
            optional_modules: HashMap::new(),
        }
    }
}
