//! Token Factory: sign and verify opaque bearer tokens.
//!
//! A token is three base64url segments joined by `.`:
//! `header.payload.signature`, where `signature = HMAC_SHA256(header ||
//! "." || payload, signing_key)`. `verify` only checks signature and
//! structural form; claim semantics (expiry, kind, identity) belong to
//! the [`crate::pipeline::TokenPipeline`].
//!
//! Built directly on `hmac` + `sha2` + `base64` rather than the
//! `jsonwebtoken` crate — `jsonwebtoken`'s `decode` validates claim
//! semantics as part of verification, which this component must not do.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Claims carried by a token. `sub`, `sid`, `jti`, `type`
/// and `styp` are the identity/kind claims the Pipeline validates;
/// `extra` holds `extra_payload` merged in for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Supplies signing/verification key material, so keys can rotate
/// without recompiling the host.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// The key used to sign new tokens.
    async fn current_signing_key(&self) -> Result<Vec<u8>, TokenError>;

    /// All keys a presented signature may validate against, newest
    /// first. Supports rotation: an old key stays in this list until
    /// every token signed with it has expired.
    async fn verification_keys(&self) -> Result<Vec<Vec<u8>>, TokenError>;
}

/// A `KeyProvider` backed by a single static secret. Useful for tests
/// and for hosts that don't rotate keys.
pub struct StaticKeyProvider {
    key: Vec<u8>,
}

impl StaticKeyProvider {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn current_signing_key(&self) -> Result<Vec<u8>, TokenError> {
        Ok(self.key.clone())
    }

    async fn verification_keys(&self) -> Result<Vec<Vec<u8>>, TokenError> {
        Ok(vec![self.key.clone()])
    }
}

/// Contract for §4.A: sign and verify opaque bearer tokens.
#[async_trait]
pub trait TokenFactory: Send + Sync {
    async fn sign(&self, claims: &Claims) -> Result<String, TokenError>;
    async fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HMAC-SHA256 implementation of [`TokenFactory`].
pub struct HmacTokenFactory<K: KeyProvider> {
    keys: Arc<K>,
}

impl<K: KeyProvider> HmacTokenFactory<K> {
    pub fn new(keys: Arc<K>) -> Self {
        Self { keys }
    }

    fn mac_for(key: &[u8]) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(key).map_err(|_| TokenError::KeyProvider("invalid key length".into()))
    }
}

#[async_trait]
impl<K: KeyProvider> TokenFactory for HmacTokenFactory<K> {
    async fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let key = self.keys.current_signing_key().await?;
        let header_b64 = B64.encode(HEADER_JSON);
        let payload_json = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
        let payload_b64 = B64.encode(payload_json);

        let signing_input = format!("{header_b64}.{payload_b64}");
        let mut mac = Self::mac_for(&key)?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = B64.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    async fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => return Err(TokenError::Malformed),
            };

        let header_bytes = B64.decode(header_b64).map_err(|_| TokenError::Malformed)?;
        if header_bytes != HEADER_JSON.as_bytes() {
            return Err(TokenError::Malformed);
        }

        let signature = B64.decode(signature_b64).map_err(|_| TokenError::Malformed)?;
        let signing_input = format!("{header_b64}.{payload_b64}");

        let keys = self.keys.verification_keys().await?;
        if keys.is_empty() {
            return Err(TokenError::UnknownKey);
        }

        let mut matched = false;
        for key in &keys {
            let mut mac = Self::mac_for(key)?;
            mac.update(signing_input.as_bytes());
            if mac.verify_slice(&signature).is_ok() {
                matched = true;
                break;
            }
        }
        if !matched {
            return Err(TokenError::BadSignature);
        }

        let payload_bytes = B64.decode(payload_b64).map_err(|_| TokenError::Malformed)?;
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> HmacTokenFactory<StaticKeyProvider> {
        HmacTokenFactory::new(Arc::new(StaticKeyProvider::new(b"a-very-secret-test-key".to_vec())))
    }

    #[tokio::test]
    async fn round_trips_claims() {
        let f = factory();
        let claims = Claims {
            iat: Some(1),
            nbf: Some(1),
            exp: Some(100),
            iss: Some("charon-test".into()),
            sub: Some("426".into()),
            sid: Some("sess-1".into()),
            kind: Some("access".into()),
            styp: Some("full".into()),
            jti: Some("rid-1".into()),
            extra: HashMap::new(),
        };
        let token = f.sign(&claims).await.unwrap();
        assert_eq!(token.matches('.').count(), 2);

        let verified = f.verify(&token).await.unwrap();
        assert_eq!(verified.sub.as_deref(), Some("426"));
        assert_eq!(verified.jti.as_deref(), Some("rid-1"));
    }

    #[tokio::test]
    async fn rejects_malformed_token() {
        let f = factory();
        assert!(matches!(
            f.verify("not-a-token").await,
            Err(TokenError::Malformed)
        ));
        assert!(matches!(
            f.verify("a.b").await,
            Err(TokenError::Malformed)
        ));
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let f = factory();
        let claims = Claims {
            sub: Some("1".into()),
            ..Default::default()
        };
        let token = f.sign(&claims).await.unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(matches!(
            f.verify(&tampered).await,
            Err(TokenError::BadSignature) | Err(TokenError::Malformed)
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_key() {
        struct EmptyKeys;
        #[async_trait]
        impl KeyProvider for EmptyKeys {
            async fn current_signing_key(&self) -> Result<Vec<u8>, TokenError> {
                Ok(b"k".to_vec())
            }
            async fn verification_keys(&self) -> Result<Vec<Vec<u8>>, TokenError> {
                Ok(vec![])
            }
        }
        let signer = factory();
        let claims = Claims::default();
        let token = signer.sign(&claims).await.unwrap();

        let verifier = HmacTokenFactory::new(Arc::new(EmptyKeys));
        assert!(matches!(
            verifier.verify(&token).await,
            Err(TokenError::UnknownKey)
        ));
    }

    #[tokio::test]
    async fn rotation_verifies_against_old_key() {
        struct TwoKeys;
        #[async_trait]
        impl KeyProvider for TwoKeys {
            async fn current_signing_key(&self) -> Result<Vec<u8>, TokenError> {
                Ok(b"new-key-aaaaaaaaaaaaaaaaaaaaaaaa".to_vec())
            }
            async fn verification_keys(&self) -> Result<Vec<Vec<u8>>, TokenError> {
                Ok(vec![
                    b"new-key-aaaaaaaaaaaaaaaaaaaaaaaa".to_vec(),
                    b"old-key-aaaaaaaaaaaaaaaaaaaaaaaa".to_vec(),
                ])
            }
        }

        let old_signer =
            HmacTokenFactory::new(Arc::new(StaticKeyProvider::new(b"old-key-aaaaaaaaaaaaaaaaaaaaaaaa".to_vec())));
        let token = old_signer.sign(&Claims::default()).await.unwrap();

        let verifier = HmacTokenFactory::new(Arc::new(TwoKeys));
        assert!(verifier.verify(&token).await.is_ok());
    }
}
