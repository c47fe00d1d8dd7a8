//! Challenge-bound encryption of the long-lived API token.
//!
//! The raw token is never sent in the clear. It is concatenated with the server-issued challenge
//! timestamp and encrypted with the public key of a KSeF certificate (RSA-OAEP, SHA-256), so a
//! captured ciphertext cannot be replayed against a later challenge.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use serde_json::Value;

use super::models::{ChallengeResponse, PublicKeyCertificate};
use crate::credential::Credential;
use crate::crypto::{self, RsaPublicKey};

/// Usage tag of certificates intended for token encryption.
pub const TOKEN_ENCRYPTION_USAGE: &str = "TokenEncryption";

/// Server-issued nonce and the timestamp that must be bound into the encrypted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub challenge: String,
    pub timestamp_ms: i64,
}

impl Challenge {
    /// Build a challenge from the raw response; `None` when the nonce or timestamp is missing.
    ///
    /// `timestampMs` wins over `timestamp`. Either may be a number or a string; `timestamp` may
    /// also be an RFC 3339 datetime.
    pub fn from_response(response: &ChallengeResponse) -> Option<Self> {
        let challenge = response
            .challenge
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())?
            .to_string();

        let timestamp_ms = response
            .timestamp_ms
            .as_ref()
            .and_then(millis_from_value)
            .or_else(|| response.timestamp.as_ref().and_then(millis_from_value))?;

        Some(Self {
            challenge,
            timestamp_ms,
        })
    }
}

fn millis_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            })
        }
        _ => None,
    }
}

/// Pick the certificate used for token encryption.
///
/// Prefers a certificate whose usage tags mention token encryption; falls back to the first entry.
pub fn select_certificate(certificates: &[PublicKeyCertificate]) -> Option<&PublicKeyCertificate> {
    certificates
        .iter()
        .find(|cert| {
            cert.usage.iter().any(|usage| {
                usage
                    .to_ascii_lowercase()
                    .contains(&TOKEN_ENCRYPTION_USAGE.to_ascii_lowercase())
            })
        })
        .or_else(|| certificates.first())
}

/// The exact plaintext that is encrypted: `<rawToken>|<timestampMs>`.
pub fn token_plaintext(raw_token: &str, timestamp_ms: i64) -> String {
    format!("{raw_token}|{timestamp_ms}")
}

/// Decode the certificate field of a [`PublicKeyCertificate`] into an RSA public key.
pub fn certificate_public_key(
    certificate: &PublicKeyCertificate,
) -> Result<RsaPublicKey, crypto::Error> {
    let text = certificate.certificate.trim();
    if text.starts_with("-----BEGIN") {
        return RsaPublicKey::from_encoded(text.as_bytes());
    }

    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD.decode(compact)?;
    RsaPublicKey::from_encoded(der)
}

/// Encrypt the credential bound to `timestamp_ms`, returning the base64 ciphertext.
pub fn encrypt_token(
    certificate: &PublicKeyCertificate,
    credential: &Credential,
    timestamp_ms: i64,
) -> Result<String, crypto::Error> {
    if credential.raw_token().trim().is_empty() {
        return Err(crypto::Error::Invalid("empty credential".into()));
    }

    let key = certificate_public_key(certificate)?;
    let plaintext = token_plaintext(credential.raw_token(), timestamp_ms);
    let ciphertext = key.encrypt_oaep(plaintext.as_bytes())?;
    Ok(STANDARD.encode(ciphertext))
}
