//! Token Pipeline: the ordered validation stages that turn an inbound
//! request into an attached session or a recorded `auth_error`. Runs
//! the same shape of checks an Axum `FromRequestParts` extractor would
//! — decode, check expiry, load the referenced row — but as an
//! explicit, framework-independent step rather than tied to one web
//! framework's extractor trait.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::AuthError;
use crate::session::SessionType;
use crate::store::SessionStore;
use crate::token::TokenFactory;
use crate::transport::{CookieSource, SignatureTransport};

/// Which kind of token a pipeline instance expects to see. A host
/// builds one `TokenPipeline` per kind — one guarding
/// access-protected routes, one guarding the refresh endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn claim_value(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Runs the validation stages against a [`RequestContext`]. Holds
/// no per-request state; safe to share across concurrent requests
/// behind an `Arc`, same as [`crate::engine::SessionEngine`].
pub struct TokenPipeline<S: SessionStore, F: TokenFactory> {
    store: Arc<S>,
    factory: Arc<F>,
    transport: SignatureTransport,
    expected_kind: TokenKind,
}

impl<S: SessionStore, F: TokenFactory> TokenPipeline<S, F> {
    pub fn new(
        store: Arc<S>,
        factory: Arc<F>,
        transport: SignatureTransport,
        expected_kind: TokenKind,
    ) -> Self {
        Self {
            store,
            factory,
            transport,
            expected_kind,
        }
    }

    /// Validates the inbound `Authorization` header value (without the
    /// `Bearer ` prefix) and, in cookie mode, the host's cookie jar.
    /// Populates `ctx` either with an attached session or a recorded
    /// `auth_error`; only a genuine session-store failure comes back as
    /// `Err`.
    pub async fn run<C: CookieSource>(
        &self,
        ctx: &mut RequestContext,
        authorization_value: &str,
        cookies: &C,
    ) -> Result<(), crate::error::StoreError> {
        ctx.token_signature_transport = Some(self.transport.clone());

        // Stage 1: reassemble.
        let token = match self.transport.reassemble(authorization_value, cookies, self.expected_kind) {
            Ok(token) => token,
            Err(err) => {
                ctx.fail(err);
                return Ok(());
            }
        };
        ctx.bearer_token = Some(token.clone());

        // Stage 2: verify signature. Any factory failure is
        // indistinguishable from "no such session" to the caller.
        let claims = match self.factory.verify(&token).await {
            Ok(claims) => claims,
            Err(_) => {
                ctx.fail(AuthError::SessionNotFound);
                return Ok(());
            }
        };

        // Stage 3: temporal claims.
        let now = chrono::Utc::now().timestamp();
        let Some(nbf) = claims.nbf else {
            ctx.fail(AuthError::ClaimNotFound("nbf"));
            return Ok(());
        };
        if nbf > now {
            ctx.fail(AuthError::NotYetValid);
            return Ok(());
        }
        let Some(exp) = claims.exp else {
            ctx.fail(AuthError::ClaimNotFound("exp"));
            return Ok(());
        };
        if exp < now {
            ctx.fail(AuthError::Expired);
            return Ok(());
        }

        // Stage 4: kind.
        let Some(kind) = claims.kind.as_deref() else {
            ctx.fail(AuthError::ClaimNotFound("type"));
            return Ok(());
        };
        if kind != self.expected_kind.claim_value() {
            ctx.fail(AuthError::KindInvalid);
            return Ok(());
        }

        // Stage 5: identity claims. `styp` defaults to "full" if absent.
        let (Some(sub), Some(sid)) = (claims.sub.clone(), claims.sid.clone()) else {
            ctx.fail(AuthError::IdentityClaimsMissing);
            return Ok(());
        };
        let session_type = SessionType::from(claims.styp.as_deref().unwrap_or(""));

        // Stage 6: load session.
        let session = self.store.get(&sid, &sub, &session_type).await?;
        let Some(session) = session else {
            ctx.fail(AuthError::SessionNotFound);
            return Ok(());
        };

        // Stage 7: attach.
        ctx.current_user_id = Some(sub);
        ctx.session_id = Some(sid);
        ctx.session = Some(session);
        ctx.bearer_token_payload = Some(claims);
        Ok(())
    }
}
