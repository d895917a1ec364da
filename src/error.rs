//! Error types shared across the token factory, session store, engine and
//! pipeline.

use thiserror::Error;

/// Failures from [`crate::token::TokenFactory::sign`] / `verify`.
///
/// `verify` only validates signature and structural form; claim
/// semantics (expiry, not-before, kind, identity) are the Pipeline's job.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unknown signing key")]
    UnknownKey,
    #[error("bad signature")]
    BadSignature,
    #[error("key provider error: {0}")]
    KeyProvider(String),
}

/// Failures from [`crate::store::SessionStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller's `lock_version` no longer matches the stored version.
    /// The Engine retries this internally; it must never reach a caller
    /// of the public API.
    #[error("optimistic lock conflict")]
    Conflict,
    #[error("store backend error: {0}")]
    Io(String),
}

/// The stable, user-visible auth-error strings a [`crate::pipeline::TokenPipeline`]
/// or [`crate::engine::SessionEngine`] attaches to a [`crate::context::RequestContext`].
///
/// `Display` produces exactly the strings named in the external interface
/// so hosts that log or render the raw string see the same text
/// regardless of whether they match on the enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("bearer token not yet valid")]
    NotYetValid,
    #[error("bearer token expired")]
    Expired,
    #[error("bearer token claim {0} not found")]
    ClaimNotFound(&'static str),
    #[error("bearer token claim type invalid")]
    KindInvalid,
    #[error("bearer token claim sub, sid or styp not found")]
    IdentityClaimsMissing,
    #[error("session not found")]
    SessionNotFound,
    #[error("token stale")]
    TokenStale,
    #[error("missing signature cookie")]
    MissingSignatureCookie,
    #[error("malformed authorization header")]
    MalformedAuthorizationHeader,
}
