//! Stateless signed-token codec for tickets.
//!
//! Tokens are `<ticket_id>.<sig>` where `sig` is the first 12 uppercase hex
//! characters of HMAC-SHA256(secret, ticket_id) — 48 bits, enough to make
//! forgery impractical for physical access while keeping the QR payload in
//! alphanumeric mode. A legacy three-part token with an embedded expiry is
//! still accepted during migration: the compact format is tried first.
//!
//! Pure functions over the token and the server secret; no network or
//! storage access.

use crate::types::TicketId;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Truncated signature length in hex characters (48 bits).
const SIGNATURE_HEX_LEN: usize = 12;

/// Token decoding failure. Both variants are user-visible denial reasons,
/// not infrastructure errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Malformed token or signature mismatch.
    #[error("Invalid token")]
    Invalid,
    /// Legacy token whose embedded expiry has passed.
    #[error("Expired token")]
    Expired,
}

/// Claims carried by the legacy self-contained token format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyClaims {
    order_id: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Encoder/decoder for signed ticket tokens.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    /// Create a codec over the server signing secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Encode a ticket identifier into its compact signed form.
    #[must_use]
    pub fn encode(&self, ticket_id: &TicketId) -> String {
        format!(
            "{}.{}",
            ticket_id.as_str(),
            self.signature(ticket_id.as_str())
        )
    }

    /// Decode and verify a token, returning the ticket identifier it names.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] on malformed input or signature
    /// mismatch, [`TokenError::Expired`] for a legacy token past its
    /// embedded expiry.
    pub fn decode(&self, token: &str) -> Result<TicketId, TokenError> {
        let parts: Vec<&str> = token.split('.').collect();
        match parts.as_slice() {
            [ticket_id, sig] => {
                if ticket_id.is_empty() {
                    return Err(TokenError::Invalid);
                }
                let expected = self.signature(ticket_id);
                if constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
                    Ok(TicketId::new(*ticket_id))
                } else {
                    Err(TokenError::Invalid)
                }
            }
            [header, payload, sig] => self.decode_legacy(header, payload, sig),
            _ => Err(TokenError::Invalid),
        }
    }

    /// Truncated uppercase hex HMAC over the ticket identifier.
    fn signature(&self, ticket_id: &str) -> String {
        let mut hex = hex::encode(self.mac(ticket_id.as_bytes()));
        hex.truncate(SIGNATURE_HEX_LEN);
        hex.to_uppercase()
    }

    fn mac(&self, data: &[u8]) -> Vec<u8> {
        // HMAC-SHA256 accepts keys of any length, so construction cannot fail.
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return Vec::new();
        };
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Verify the legacy `header.payload.signature` format: full HMAC over
    /// the signing input, then the embedded expiry.
    fn decode_legacy(
        &self,
        header: &str,
        payload: &str,
        sig: &str,
    ) -> Result<TicketId, TokenError> {
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| TokenError::Invalid)?;
        let signing_input = format!("{header}.{payload}");
        let expected = self.mac(signing_input.as_bytes());
        if !constant_time_eq(&sig_bytes, &expected) {
            return Err(TokenError::Invalid);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Invalid)?;
        let claims: LegacyClaims =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Invalid)?;

        if let Some(expires_at) = claims.expires_at {
            if expires_at < chrono::Utc::now().timestamp_millis() {
                return Err(TokenError::Expired);
            }
        }

        Ok(TicketId::new(claims.order_id))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test-secret".to_vec())
    }

    /// Build a legacy-format token for migration tests.
    fn encode_legacy(codec: &TokenCodec, order_id: &str, expires_at: Option<i64>) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = match expires_at {
            Some(exp) => format!(r#"{{"orderId":"{order_id}","expiresAt":{exp}}}"#),
            None => format!(r#"{{"orderId":"{order_id}"}}"#),
        };
        let payload = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        let signing_input = format!("{header}.{payload}");
        let sig = URL_SAFE_NO_PAD.encode(codec.mac(signing_input.as_bytes()));
        format!("{signing_input}.{sig}")
    }

    #[test]
    fn encode_decode_round_trip() {
        let codec = codec();
        for id in ["ORD-AB12CD", "ORD-MLGEHV5N-0FSUFT", "x"] {
            let ticket = TicketId::new(id);
            let token = codec.encode(&ticket);
            assert_eq!(codec.decode(&token).unwrap(), ticket);
        }
    }

    #[test]
    fn signature_is_short_uppercase_hex() {
        let token = codec().encode(&TicketId::new("ORD-AB12CD"));
        let sig = token.split('.').nth(1).unwrap();
        assert_eq!(sig.len(), SIGNATURE_HEX_LEN);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let codec = codec();
        let token = codec.encode(&TicketId::new("ORD-AB12CD"));
        let (id_part, sig) = token.split_once('.').unwrap();
        // Flip every signature position in turn.
        for i in 0..sig.len() {
            let mut chars: Vec<char> = sig.chars().collect();
            chars[i] = if chars[i] == '0' { '1' } else { '0' };
            let tampered: String = chars.into_iter().collect();
            assert_eq!(
                codec.decode(&format!("{id_part}.{tampered}")),
                Err(TokenError::Invalid),
                "position {i} should not verify"
            );
        }
    }

    #[test]
    fn tampered_ticket_id_is_rejected() {
        let codec = codec();
        let token = codec.encode(&TicketId::new("ORD-AB12CD"));
        let swapped = token.replacen("AB12CD", "AB12CE", 1);
        assert_eq!(codec.decode(&swapped), Err(TokenError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        let codec = codec();
        assert_eq!(codec.decode(""), Err(TokenError::Invalid));
        assert_eq!(codec.decode("no-separator"), Err(TokenError::Invalid));
        assert_eq!(codec.decode("a.b.c.d"), Err(TokenError::Invalid));
        assert_eq!(codec.decode(".ABCDEF012345"), Err(TokenError::Invalid));
    }

    #[test]
    fn legacy_token_still_decodes() {
        let codec = codec();
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        let token = encode_legacy(&codec, "ORD-LEGACY-1", Some(future));
        assert_eq!(
            codec.decode(&token).unwrap(),
            TicketId::new("ORD-LEGACY-1")
        );

        let token = encode_legacy(&codec, "ORD-LEGACY-2", None);
        assert_eq!(
            codec.decode(&token).unwrap(),
            TicketId::new("ORD-LEGACY-2")
        );
    }

    #[test]
    fn expired_legacy_token_is_rejected() {
        let codec = codec();
        let past = chrono::Utc::now().timestamp_millis() - 1_000;
        let token = encode_legacy(&codec, "ORD-LEGACY-3", Some(past));
        assert_eq!(codec.decode(&token), Err(TokenError::Expired));
    }

    #[test]
    fn legacy_token_with_wrong_secret_is_invalid() {
        let signer = TokenCodec::new(b"other-secret".to_vec());
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        let token = encode_legacy(&signer, "ORD-LEGACY-4", Some(future));
        assert_eq!(codec().decode(&token), Err(TokenError::Invalid));
    }
}
