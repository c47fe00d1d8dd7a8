//! Long-lived KSeF API token and the taxpayer identifier derived from it.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};

/// Prefix of the second token segment that carries the taxpayer identifier.
const TAX_ID_PREFIX: &str = "nip-";

/// A raw API token of the form `<reference>|nip-<taxId>|<secret>`.
#[derive(Clone)]
pub struct Credential {
    raw_token: Arc<SecretString>,
    tax_id: Option<String>,
}

impl Credential {
    pub fn new(raw_token: impl Into<String>) -> Self {
        let raw_token: String = raw_token.into();
        let tax_id = parse_tax_id(&raw_token);
        Self {
            raw_token: Arc::new(SecretString::from(raw_token)),
            tax_id,
        }
    }

    /// The raw token. Only meant to be bound into an encrypted challenge payload.
    pub fn raw_token(&self) -> &str {
        self.raw_token.expose_secret()
    }

    /// The taxpayer identifier, absent for malformed tokens.
    pub fn tax_id(&self) -> Option<&str> {
        self.tax_id.as_deref()
    }

    /// A credential can start authentication only with a non-empty token and a tax id.
    pub fn is_usable(&self) -> bool {
        !self.raw_token().trim().is_empty() && self.tax_id.is_some()
    }
}

impl From<SecretString> for Credential {
    fn from(secret: SecretString) -> Self {
        Self::new(secret.expose_secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("raw_token", &"[REDACTED]")
            .field("tax_id", &self.tax_id)
            .finish()
    }
}

fn parse_tax_id(raw_token: &str) -> Option<String> {
    let segment = raw_token.split('|').nth(1)?.trim();
    let tax_id = segment.strip_prefix(TAX_ID_PREFIX).unwrap_or(segment);
    (!tax_id.is_empty()).then(|| tax_id.to_string())
}

/// Shared holder of the currently configured credential.
///
/// The token can be replaced at runtime (e.g. after the user edits settings);
/// the next authentication attempt picks up the new value.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<Option<Credential>>>,
}

impl CredentialStore {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credential)),
        }
    }

    pub fn get(&self) -> Option<Credential> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, credential: Option<Credential>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = credential;
    }

    pub fn tax_id(&self) -> Option<String> {
        self.get().and_then(|c| c.tax_id().map(str::to_string))
    }
}
