//! At-rest integrity for serialized sessions: each serialized session
//! is prefixed with an HMAC over its bytes, computed with a key from a
//! configurable getter; verification failures are treated as
//! non-existent and logged with the `[charon]`-prefixed `eprintln!`
//! convention used elsewhere in this crate.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefixes `plaintext` with a base64 HMAC-SHA256 tag followed by `|`.
pub fn seal(plaintext: &[u8], key: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(plaintext);
    let tag = B64.encode(mac.finalize().into_bytes());
    let mut out = Vec::with_capacity(tag.len() + 1 + plaintext.len());
    out.extend_from_slice(tag.as_bytes());
    out.push(b'|');
    out.extend_from_slice(plaintext);
    out
}

/// Verifies and strips the HMAC prefix written by [`seal`]. Returns
/// `None` on any malformed or mismatched tag; callers treat that the
/// same as "session does not exist".
pub fn open_sealed(sealed: &[u8], key: &[u8]) -> Option<Vec<u8>> {
    let separator = sealed.iter().position(|&b| b == b'|')?;
    let (tag_b64, rest) = sealed.split_at(separator);
    let plaintext = &rest[1..];

    let expected_tag = B64.decode(tag_b64).ok()?;
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(plaintext);
    mac.verify_slice(&expected_tag).ok()?;

    Some(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = b"sealing-key";
        let sealed = seal(b"hello session", key);
        assert_eq!(open_sealed(&sealed, key).unwrap(), b"hello session");
    }

    #[test]
    fn rejects_tampered_bytes() {
        let key = b"sealing-key";
        let mut sealed = seal(b"hello session", key);
        *sealed.last_mut().unwrap() ^= 0xff;
        assert!(open_sealed(&sealed, key).is_none());
    }

    #[test]
    fn rejects_wrong_key() {
        let sealed = seal(b"hello session", b"key-one");
        assert!(open_sealed(&sealed, b"key-two").is_none());
    }
}
