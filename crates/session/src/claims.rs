//! Unverified access-token claims
//!
//! The client never verifies token signatures; it only reads the payload
//! segment to learn the subject, role, and expiry. Anything that does not
//! decode is reported as `Error::Decode` and treated by callers as expired.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Claims read from the payload of an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject_id: Option<String>,
    pub role: Option<String>,
    /// Issued-at, unix seconds
    pub issued_at: Option<u64>,
    /// Expiry, unix seconds
    pub expires_at: u64,
}

impl TokenClaims {
    /// Expiry as unix milliseconds.
    pub fn expires_at_millis(&self) -> u64 {
        self.expires_at.saturating_mul(1000)
    }
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default, alias = "sub")]
    uid: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    iat: Option<u64>,
    exp: u64,
}

/// Decode the claims segment of a `header.payload.signature` token.
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(Error::Decode("token is not three dot-separated segments".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::Decode(format!("payload is not base64url: {e}")))?;
    let raw: RawClaims = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Decode(format!("payload is not a claims object: {e}")))?;

    Ok(TokenClaims {
        subject_id: raw.uid,
        role: raw.role,
        issued_at: raw.iat,
        expires_at: raw.exp,
    })
}

/// Build an unsigned token carrying the given claims payload.
#[cfg(test)]
pub(crate) fn unsigned_token(payload: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_standard_claims() {
        let token = unsigned_token(json!({
            "uid": "u-1",
            "role": "Admin",
            "iat": 1_700_000_000u64,
            "exp": 1_700_000_900u64,
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.subject_id.as_deref(), Some("u-1"));
        assert_eq!(claims.role.as_deref(), Some("Admin"));
        assert_eq!(claims.issued_at, Some(1_700_000_000));
        assert_eq!(claims.expires_at_millis(), 1_700_000_900_000);
    }

    #[test]
    fn sub_is_accepted_for_subject() {
        let token = unsigned_token(json!({"sub": "u-9", "exp": 10}));
        assert_eq!(decode_claims(&token).unwrap().subject_id.as_deref(), Some("u-9"));
    }

    #[test]
    fn padded_payload_is_tolerated() {
        let token = unsigned_token(json!({"exp": 42}));
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1].push_str("==");
        assert_eq!(decode_claims(&parts.join(".")).unwrap().expires_at, 42);
    }

    #[test]
    fn malformed_tokens_fail_to_decode() {
        for token in ["", "opaque", "a.b", "a.b.c.d", "a.!!!.c"] {
            assert!(
                matches!(decode_claims(token), Err(Error::Decode(_))),
                "{token:?} should not decode"
            );
        }
    }

    #[test]
    fn missing_expiry_fails_to_decode() {
        let token = unsigned_token(json!({"uid": "u-1"}));
        assert!(matches!(decode_claims(&token), Err(Error::Decode(_))));
    }
}
