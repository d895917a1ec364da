//! Request Context Adapter: the value bag the Engine and
//! Pipeline read from and write to. The concrete request/response types
//! of a host framework are opaque to this crate — a host maps its own
//! request type into a `RequestContext`, runs it through the Pipeline or
//! Engine, then reads the fields back out to build its response.

use crate::error::AuthError;
use crate::session::Session;
use crate::token::Claims;
use crate::transport::SignatureTransport;
use std::collections::HashMap;

/// The engine's minted token pair plus their expiries.
#[derive(Debug, Clone)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_exp: i64,
    pub refresh_token_exp: i64,
}

/// Carries in/out values between pipeline stages and the session engine.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub current_user_id: Option<String>,
    pub token_signature_transport: Option<SignatureTransport>,
    pub session: Option<Session>,
    pub session_id: Option<String>,
    pub tokens: Option<Tokens>,
    pub bearer_token_payload: Option<Claims>,
    pub bearer_token: Option<String>,
    pub auth_error: Option<AuthError>,
    pub halted: bool,
    /// `Set-Cookie` values to attach to the outbound response, keyed by
    /// cookie name.
    pub resp_cookies: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the context failed and halts further pipeline stages. A
    /// pipeline stage calls this instead of returning a `Result` so a
    /// host can inspect `auth_error`/`halted` uniformly regardless of
    /// which stage failed — the pipeline never throws.
    pub fn fail(&mut self, error: AuthError) {
        self.auth_error = Some(error);
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}
