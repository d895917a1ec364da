//! Session Engine: the central state machine. Creates and rotates
//! sessions, enforces the two-generation rotation window and its grace
//! period, and resolves optimistic-lock conflicts by treating the
//! loser as an idempotent previous-generation refresh.

use chrono::Utc;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::CharonConfig;
use crate::context::{RequestContext, Tokens};
use crate::error::{AuthError, StoreError};
use crate::session::{INFINITE, Session, SessionType, TransportMode};
use crate::store::SessionStore;
use crate::token::{Claims, TokenFactory};
use crate::transport::{SignatureTransport, build_clear_cookie};

/// Inputs to [`SessionEngine::upsert_session`] that only matter when no
/// session is yet attached to the context (a login, not a refresh).
#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    pub user_id: String,
    pub session_type: SessionType,
    pub transport: TransportMode,
    pub extra_payload: HashMap<String, serde_json::Value>,
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn new_jti() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

/// What actually happened during a refresh; kept internal so the public
/// [`Tokens`] type stays observably identical whether the refresh slid
/// the window or replayed a previous generation — both must look the
/// same to the caller.
enum RotationOutcome {
    Created,
    Slid,
    ConflictResolvedAsReplay,
    PreviousGenerationReplay,
}

pub struct SessionEngine<S: SessionStore, F: TokenFactory> {
    store: Arc<S>,
    factory: Arc<F>,
    config: CharonConfig,
}

impl<S: SessionStore, F: TokenFactory> SessionEngine<S, F> {
    pub fn new(store: Arc<S>, factory: Arc<F>, config: CharonConfig) -> Self {
        Self {
            store,
            factory,
            config,
        }
    }

    /// Builds the cookie-bearing [`SignatureTransport`] this session uses
    /// from its recorded [`TransportMode`] tag plus the configured cookie
    /// names. The engine is the only thing that knows both, so it never
    /// asks the host to re-supply cookie names it already configured.
    fn signature_transport_for(&self, mode: TransportMode) -> SignatureTransport {
        match mode {
            TransportMode::Bearer => SignatureTransport::Bearer,
            TransportMode::Cookie => SignatureTransport::Cookie {
                access_cookie_name: self.config.access_cookie_name.clone(),
                refresh_cookie_name: self.config.refresh_cookie_name.clone(),
            },
        }
    }

    /// Creates a new session (when `ctx.session` is `None`) or rotates
    /// the one already attached to `ctx` (a refresh). On success,
    /// `ctx.session`, `ctx.tokens` and, in cookie-transport mode,
    /// `ctx.resp_cookies` are populated. Domain failures (stale token)
    /// are recorded via [`RequestContext::fail`], not as an `Err`; only
    /// a genuine store I/O failure is returned as `Err`.
    pub async fn upsert_session(
        &self,
        ctx: &mut RequestContext,
        opts: UpsertOptions,
    ) -> Result<(), StoreError> {
        let (session, outcome) = match ctx.session.take() {
            None => (self.create(&opts).await?, RotationOutcome::Created),
            Some(existing) => match self.refresh(ctx, existing).await? {
                Ok(result) => result,
                Err(auth_error) => {
                    ctx.fail(auth_error);
                    return Ok(());
                }
            },
        };

        let tokens = self
            .mint_tokens(&session)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let transport = self.signature_transport_for(session.transport);
        self.attach_cookies(ctx, &transport, &tokens);
        ctx.token_signature_transport = Some(transport);
        ctx.session = Some(session);
        ctx.tokens = Some(tokens);
        let _ = outcome;
        Ok(())
    }

    /// Deletes the session attached to `ctx` and clears its transport
    /// cookies. A no-op if no session is attached.
    pub async fn logout(&self, ctx: &mut RequestContext) -> Result<(), StoreError> {
        let Some(session) = ctx.session.take() else {
            return Ok(());
        };

        self.store
            .delete(&session.id, &session.user_id, &session.session_type)
            .await?;

        if let SignatureTransport::Cookie {
            access_cookie_name,
            refresh_cookie_name,
        } = self.signature_transport_for(session.transport)
        {
            ctx.resp_cookies.insert(
                access_cookie_name.clone(),
                build_clear_cookie(&access_cookie_name, &self.config.access_cookie_opts),
            );
            ctx.resp_cookies.insert(
                refresh_cookie_name.clone(),
                build_clear_cookie(&refresh_cookie_name, &self.config.refresh_cookie_opts),
            );
        }

        ctx.session_id = None;
        ctx.current_user_id = None;
        Ok(())
    }

    async fn create(&self, opts: &UpsertOptions) -> Result<Session, StoreError> {
        let now = Utc::now().timestamp();
        let expires_at = if self.config.session_ttl_secs <= 0 {
            INFINITE
        } else {
            now + self.config.session_ttl_secs
        };
        let refresh_expires_at =
            Session::compute_refresh_expires_at(expires_at, now, self.config.refresh_token_ttl_secs);

        let session = Session {
            id: new_session_id(),
            user_id: opts.user_id.clone(),
            session_type: opts.session_type.clone(),
            created_at: now,
            refreshed_at: now,
            expires_at,
            refresh_expires_at,
            refresh_token_id: new_jti(),
            tokens_fresh_from: now,
            prev_tokens_fresh_from: 0,
            lock_version: 1,
            extra_payload: opts.extra_payload.clone(),
            transport: opts.transport.clone(),
        };

        self.store.upsert(&session).await?;
        Ok(session)
    }

    /// Classifies the inbound refresh token's generation, slides the
    /// rotation window on a current-generation refresh, and resolves a
    /// concurrent writer's optimistic-lock conflict as an idempotent
    /// replay rather than surfacing it. Returns
    /// `Ok(Err(auth_error))` for domain failures the caller should
    /// surface via `ctx.fail`, keeping real store errors in the `Result`
    /// channel.
    async fn refresh(
        &self,
        ctx: &RequestContext,
        session: Session,
    ) -> Result<Result<(Session, RotationOutcome), AuthError>, StoreError> {
        let Some(token_iat) = ctx.bearer_token_payload.as_ref().and_then(|c| c.iat) else {
            return Ok(Err(AuthError::ClaimNotFound("iat")));
        };

        if session.is_stale(token_iat) {
            return Ok(Err(AuthError::TokenStale));
        }

        if session.is_previous_generation(token_iat) {
            return Ok(Ok((session, RotationOutcome::PreviousGenerationReplay)));
        }

        // Current generation: slide the window.
        let now = Utc::now().timestamp();
        let mut next = session.clone();
        next.prev_tokens_fresh_from = session.tokens_fresh_from;
        next.tokens_fresh_from = now;
        next.refreshed_at = now;
        next.refresh_token_id = new_jti();
        next.lock_version = session.lock_version + 1;
        next.refresh_expires_at = Session::compute_refresh_expires_at(
            session.expires_at,
            now,
            self.config.refresh_token_ttl_secs,
        );

        match self.store.upsert(&next).await {
            Ok(()) => Ok(Ok((next, RotationOutcome::Slid))),
            Err(StoreError::Conflict) => {
                // Someone else's rotation won the race. Re-read their
                // result and mint tokens against it without mutating
                // again — equivalent to a previous-generation replay
                // from the caller's point of view.
                let fresh = self
                    .store
                    .get(&session.id, &session.user_id, &session.session_type)
                    .await?
                    .ok_or(StoreError::Io("session vanished after conflict".into()))?;
                Ok(Ok((fresh, RotationOutcome::ConflictResolvedAsReplay)))
            }
            Err(other) => Err(other),
        }
    }

    async fn mint_tokens(&self, session: &Session) -> Result<Tokens, crate::error::TokenError> {
        let now = Utc::now().timestamp();
        let access_exp = (now + self.config.access_token_ttl_secs).min(session.refresh_expires_at);

        let refresh_claims = Claims {
            iat: Some(session.tokens_fresh_from),
            nbf: Some(session.tokens_fresh_from),
            exp: Some(session.refresh_expires_at),
            iss: Some(self.config.token_issuer.clone()),
            sub: Some(session.user_id.clone()),
            sid: Some(session.id.clone()),
            kind: Some("refresh".to_string()),
            styp: Some(session.session_type.to_string()),
            jti: Some(session.refresh_token_id.clone()),
            extra: HashMap::new(),
        };

        let access_claims = Claims {
            iat: Some(now),
            nbf: Some(now),
            exp: Some(access_exp),
            iss: Some(self.config.token_issuer.clone()),
            sub: Some(session.user_id.clone()),
            sid: Some(session.id.clone()),
            kind: Some("access".to_string()),
            styp: Some(session.session_type.to_string()),
            jti: Some(session.refresh_token_id.clone()),
            extra: session.extra_payload.clone(),
        };

        let access_token = self.factory.sign(&access_claims).await?;
        let refresh_token = self.factory.sign(&refresh_claims).await?;

        Ok(Tokens {
            access_token,
            refresh_token,
            access_token_exp: access_exp,
            refresh_token_exp: session.refresh_expires_at,
        })
    }

    fn attach_cookies(&self, ctx: &mut RequestContext, transport: &SignatureTransport, tokens: &Tokens) {
        if !matches!(transport, SignatureTransport::Cookie { .. }) {
            return;
        }

        let (_, access_cookie) =
            transport.split_for_response(&tokens.access_token, crate::pipeline::TokenKind::Access);
        let (_, refresh_cookie) =
            transport.split_for_response(&tokens.refresh_token, crate::pipeline::TokenKind::Refresh);

        if let Some((name, value)) = access_cookie {
            ctx.resp_cookies.insert(
                name,
                crate::transport::build_set_cookie(
                    &self.config.access_cookie_name,
                    &value,
                    &self.config.access_cookie_opts,
                ),
            );
        }
        if let Some((name, value)) = refresh_cookie {
            ctx.resp_cookies.insert(
                name,
                crate::transport::build_set_cookie(
                    &self.config.refresh_cookie_name,
                    &value,
                    &self.config.refresh_cookie_opts,
                ),
            );
        }
    }
}
