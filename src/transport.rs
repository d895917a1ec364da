//! Signature Transport: how a token's signature reaches the server —
//! inline in `Authorization` (`bearer`) or split with the signature in
//! an HTTP-only cookie (`cookie`).
//!
//! `Set-Cookie` header strings are hand-built with `format!` rather
//! than pulling in a cookie-jar crate, since the transport must stay
//! independent of whichever HTTP framework a host uses.

use crate::config::CookieOpts;
use crate::error::AuthError;

/// Minimal read access to inbound cookies. Hosts implement this over
/// whatever cookie-jar type their framework hands them (an Axum
/// `CookieJar`, a raw `Cookie` header split, etc); Charon never parses
/// a `Cookie` header itself.
pub trait CookieSource {
    fn get(&self, name: &str) -> Option<&str>;
}

impl CookieSource for std::collections::HashMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

/// How a session's tokens are carried between client and server
/// (recorded on the [`crate::session::Session`] at creation time).
#[derive(Debug, Clone)]
pub enum SignatureTransport {
    /// The full three-segment token travels in `Authorization: Bearer <token>`.
    Bearer,
    /// `header.payload` travels in `Authorization`; `signature` travels in
    /// an HTTP-only cookie named per `access_cookie_name`/`refresh_cookie_name`.
    Cookie {
        access_cookie_name: String,
        refresh_cookie_name: String,
    },
}

impl Default for SignatureTransport {
    fn default() -> Self {
        SignatureTransport::Bearer
    }
}

impl SignatureTransport {
    fn cookie_name_for(&self, kind: crate::pipeline::TokenKind) -> Option<&str> {
        match (self, kind) {
            (SignatureTransport::Cookie { access_cookie_name, .. }, crate::pipeline::TokenKind::Access) => {
                Some(access_cookie_name)
            }
            (SignatureTransport::Cookie { refresh_cookie_name, .. }, crate::pipeline::TokenKind::Refresh) => {
                Some(refresh_cookie_name)
            }
            (SignatureTransport::Bearer, _) => None,
        }
    }

    /// Reconstructs the full `header.payload.signature` token from the
    /// `Authorization` header value (already stripped of the `Bearer `
    /// prefix by the caller) and, in cookie mode, the matching signature
    /// cookie.
    pub fn reassemble<C: CookieSource>(
        &self,
        authorization_value: &str,
        cookies: &C,
        kind: crate::pipeline::TokenKind,
    ) -> Result<String, AuthError> {
        match self {
            SignatureTransport::Bearer => Ok(authorization_value.to_string()),
            SignatureTransport::Cookie { .. } => {
                let cookie_name = self
                    .cookie_name_for(kind)
                    .expect("cookie mode always has a name for every TokenKind");
                let signature = cookies
                    .get(cookie_name)
                    .ok_or(AuthError::MissingSignatureCookie)?;
                if authorization_value.is_empty() {
                    return Err(AuthError::MalformedAuthorizationHeader);
                }
                Ok(format!("{authorization_value}.{signature}"))
            }
        }
    }

    /// Splits a freshly-minted token into what goes in `Authorization`
    /// (returned) and what, if anything, should be set as a cookie
    /// (`Some((cookie_name, signature))` in cookie mode).
    pub fn split_for_response(
        &self,
        token: &str,
        kind: crate::pipeline::TokenKind,
    ) -> (String, Option<(String, String)>) {
        match self {
            SignatureTransport::Bearer => (token.to_string(), None),
            SignatureTransport::Cookie { .. } => {
                let cookie_name = self
                    .cookie_name_for(kind)
                    .expect("cookie mode always has a name for every TokenKind")
                    .to_string();
                match token.rsplit_once('.') {
                    Some((header_payload, signature)) => (
                        header_payload.to_string(),
                        Some((cookie_name, signature.to_string())),
                    ),
                    None => (token.to_string(), None),
                }
            }
        }
    }
}

/// Builds a `Set-Cookie` header value.
pub fn build_set_cookie(name: &str, value: &str, opts: &CookieOpts) -> String {
    let mut cookie = format!("{name}={value}; Path={}", opts.path);
    if opts.http_only {
        cookie.push_str("; HttpOnly");
    }
    if opts.secure {
        cookie.push_str("; Secure");
    }
    cookie.push_str(&format!("; SameSite={}", opts.same_site));
    cookie.push_str(&format!("; Max-Age={}", opts.max_age_secs));
    cookie
}

/// Builds a `Set-Cookie` header value that clears a previously-set
/// signature cookie.
pub fn build_clear_cookie(name: &str, opts: &CookieOpts) -> String {
    format!(
        "{name}=; Path={}; HttpOnly; Secure; SameSite={}; Max-Age=0",
        opts.path, opts.same_site
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TokenKind;
    use std::collections::HashMap;

    fn cookie_transport() -> SignatureTransport {
        SignatureTransport::Cookie {
            access_cookie_name: "_access_token_signature".into(),
            refresh_cookie_name: "_refresh_token_signature".into(),
        }
    }

    #[test]
    fn bearer_reassembles_from_header_alone() {
        let transport = SignatureTransport::Bearer;
        let jar: HashMap<String, String> = HashMap::new();
        let token = transport
            .reassemble("h.p.s", &jar, TokenKind::Access)
            .unwrap();
        assert_eq!(token, "h.p.s");
    }

    #[test]
    fn cookie_mode_splits_and_rejoins() {
        let transport = cookie_transport();
        let (header_payload, cookie) =
            transport.split_for_response("h.p.s", TokenKind::Access);
        assert_eq!(header_payload, "h.p");
        let (name, sig) = cookie.unwrap();
        assert_eq!(name, "_access_token_signature");
        assert_eq!(sig, "s");

        let mut jar = HashMap::new();
        jar.insert(name, sig);
        let reassembled = transport
            .reassemble(&header_payload, &jar, TokenKind::Access)
            .unwrap();
        assert_eq!(reassembled, "h.p.s");
    }

    #[test]
    fn cookie_mode_missing_cookie_fails() {
        let transport = cookie_transport();
        let jar: HashMap<String, String> = HashMap::new();
        let err = transport
            .reassemble("h.p", &jar, TokenKind::Refresh)
            .unwrap_err();
        assert_eq!(err, AuthError::MissingSignatureCookie);
    }

    #[test]
    fn cookie_string_contains_expected_attributes() {
        let opts = CookieOpts {
            http_only: true,
            secure: true,
            same_site: "Strict".into(),
            path: "/".into(),
            max_age_secs: 600,
        };
        let cookie = build_set_cookie("_access_token_signature", "sig", &opts);
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Max-Age=600"));
    }
}
