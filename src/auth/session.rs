use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

use super::errors::AuthError;
use crate::credential::{Credential, CredentialStore};
use crate::ksef::KsefClient;
use crate::ksef::challenge::{self, Challenge};
use crate::ksef::models::{ContextIdentifier, KsefTokenRequest, PublicKeyCertificate};

const STATUS_IN_PROGRESS: i64 = 100;
const STATUS_READY: i64 = 200;

/// Timing of the status-polling step.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub poll_interval: Duration,
    /// Total polling budget, independent of the per-request timeout.
    pub poll_timeout: Duration,
    /// Surface [`AuthError::AuthStatusTimeout`] instead of redeeming optimistically.
    pub fail_on_status_timeout: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            poll_timeout: Duration::from_millis(5000),
            fail_on_status_timeout: false,
        }
    }
}

/// Handshake progress. Any step may fail, which returns the session to `Unauthenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    CertificateLoading,
    ChallengeRequested,
    TokenEncrypted,
    AuthSubmitted,
    StatusPolling,
    Redeeming,
    Authenticated,
    Failed,
}

/// Short-lived access credential and its expiry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AccessSession {
    access_credential: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessSession {
    pub fn new(access_credential: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            access_credential: Some(access_credential.into()),
            expires_at,
        }
    }

    pub fn access_credential(&self) -> Option<&str> {
        self.access_credential.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Valid iff a credential is present and it has not expired at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.access_credential.is_some() && self.expires_at.is_none_or(|exp| exp > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Time left until expiry; `None` when there is no credential or no known expiry.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.access_credential.as_ref()?;
        self.expires_at.map(|exp| exp - now)
    }
}

impl fmt::Debug for AccessSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessSession")
            .field(
                "access_credential",
                &self.access_credential.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Temporary token issued by the submit step, used as bearer for polling and redemption.
struct PendingAuthentication {
    reference_number: String,
    authentication_token: String,
}

/// Owner of the authenticated KSeF session.
///
/// Built once and shared through an `Arc`. Concurrent [`authenticate`](Self::authenticate)
/// calls are serialised: a caller that waited for an in-flight attempt reuses the session it
/// produced instead of running a second handshake.
pub struct AuthSession {
    client: KsefClient,
    credentials: CredentialStore,
    config: AuthConfig,
    session: RwLock<AccessSession>,
    state: RwLock<AuthState>,
    in_flight: Mutex<()>,
    completed: AtomicU64,
}

impl AuthSession {
    pub fn new(client: KsefClient, credentials: CredentialStore, config: AuthConfig) -> Self {
        Self {
            client,
            credentials,
            config,
            session: RwLock::new(AccessSession::default()),
            state: RwLock::new(AuthState::Unauthenticated),
            in_flight: Mutex::new(()),
            completed: AtomicU64::new(0),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn state(&self) -> AuthState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current session.
    pub fn current(&self) -> AccessSession {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_valid(&self) -> bool {
        self.current().is_valid()
    }

    /// The access credential, only while the session is valid.
    pub fn access_credential(&self) -> Option<String> {
        let session = self.current();
        if session.is_valid() {
            session.access_credential
        } else {
            None
        }
    }

    /// Drop the current session, e.g. after a 401, so the next call re-authenticates.
    pub fn invalidate(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = AccessSession::default();
        self.transition(AuthState::Unauthenticated);
        info!("KSeF session invalidated");
    }

    /// Return a valid access credential, authenticating first if needed.
    pub async fn ensure_valid(&self) -> Result<String, AuthError> {
        if let Some(token) = self.access_credential() {
            return Ok(token);
        }
        self.authenticate()
            .await?
            .access_credential
            .ok_or_else(|| AuthError::RedemptionFailed("no access token".into()))
    }

    /// Run the full handshake with the configured credential and store the resulting session.
    pub async fn authenticate(&self) -> Result<AccessSession, AuthError> {
        let observed = self.completed.load(Ordering::Acquire);
        let _guard = self.in_flight.lock().await;

        if self.completed.load(Ordering::Acquire) != observed {
            let current = self.current();
            if current.is_valid() {
                debug!("Reusing session established by a concurrent attempt");
                return Ok(current);
            }
        }

        match self.handshake().await {
            Ok(session) => {
                *self.session.write().unwrap_or_else(PoisonError::into_inner) = session.clone();
                self.completed.fetch_add(1, Ordering::AcqRel);
                self.transition(AuthState::Authenticated);
                info!(expires_at = ?session.expires_at, "KSeF authentication succeeded");
                Ok(session)
            }
            Err(e) => {
                error!("KSeF authentication failed: {e}");
                self.transition(AuthState::Failed);
                self.transition(AuthState::Unauthenticated);
                Err(e)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn handshake(&self) -> Result<AccessSession, AuthError> {
        let credential = self
            .credentials
            .get()
            .filter(Credential::is_usable)
            .ok_or(AuthError::MissingCredential)?;
        let tax_id = credential
            .tax_id()
            .ok_or(AuthError::MissingCredential)?
            .to_string();

        self.transition(AuthState::CertificateLoading);
        let certificate = self.load_certificate().await?;

        self.transition(AuthState::ChallengeRequested);
        let challenge = self.request_challenge().await?;

        let encrypted_token =
            challenge::encrypt_token(&certificate, &credential, challenge.timestamp_ms)
                .map_err(|e| AuthError::EncryptionFailed(e.to_string()))?;
        self.transition(AuthState::TokenEncrypted);

        let pending = self
            .submit(KsefTokenRequest {
                challenge: challenge.challenge,
                context_identifier: ContextIdentifier::nip(tax_id),
                encrypted_token,
            })
            .await?;
        self.transition(AuthState::AuthSubmitted);

        self.transition(AuthState::StatusPolling);
        match self.await_ready(&pending).await {
            Ok(()) => {}
            Err(AuthError::AuthStatusTimeout { waited_ms })
                if !self.config.fail_on_status_timeout =>
            {
                warn!(
                    waited_ms,
                    reference_number = %pending.reference_number,
                    "Authentication status not confirmed, redeeming anyway"
                );
            }
            Err(e) => return Err(e),
        }

        self.transition(AuthState::Redeeming);
        self.redeem(&pending).await
    }

    async fn load_certificate(&self) -> Result<PublicKeyCertificate, AuthError> {
        let certificates = self
            .client
            .public_key_certificates()
            .await
            .map_err(|e| AuthError::from_api(e, AuthError::CertificateUnavailable))?;

        challenge::select_certificate(&certificates)
            .cloned()
            .ok_or_else(|| AuthError::CertificateUnavailable("no certificates published".into()))
    }

    async fn request_challenge(&self) -> Result<Challenge, AuthError> {
        let response = self
            .client
            .challenge()
            .await
            .map_err(|e| AuthError::from_api(e, AuthError::ChallengeUnavailable))?;

        Challenge::from_response(&response).ok_or_else(|| {
            AuthError::ChallengeUnavailable("response lacks challenge or timestamp".into())
        })
    }

    async fn submit(&self, request: KsefTokenRequest) -> Result<PendingAuthentication, AuthError> {
        let response = self
            .client
            .submit_ksef_token(&request)
            .await
            .map_err(|e| AuthError::from_api(e, AuthError::AuthSubmitRejected))?;

        let reference_number = response
            .reference_number
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AuthError::AuthSubmitRejected("missing reference number".into()))?;
        let authentication_token = response
            .authentication_token
            .and_then(|t| t.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::AuthSubmitRejected("missing authentication token".into()))?;

        debug!(%reference_number, "Authentication request accepted");
        Ok(PendingAuthentication {
            reference_number,
            authentication_token,
        })
    }

    /// Poll until the server reports the authentication as ready.
    ///
    /// `100` and `404` mean "not yet"; transport errors are retried; any other status code or
    /// HTTP error is terminal.
    async fn await_ready(&self, pending: &PendingAuthentication) -> Result<(), AuthError> {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = self
                .client
                .auth_status(&pending.reference_number, &pending.authentication_token)
                .await;

            match result {
                Ok(response) => match response.status {
                    Some(status) if status.code == STATUS_READY => {
                        debug!(attempt, "Authentication ready");
                        return Ok(());
                    }
                    Some(status) if status.code != STATUS_IN_PROGRESS => {
                        let mut description = status.description.unwrap_or_default();
                        if let Some(details) = status.details.filter(|d| !d.is_empty()) {
                            description = format!("{description} ({})", details.join("; "));
                        }
                        return Err(AuthError::AuthStatusFailed {
                            code: status.code,
                            description,
                        });
                    }
                    _ => debug!(attempt, "Authentication in progress"),
                },
                Err(e) if e.is_not_found() => debug!(attempt, "Authentication not yet visible"),
                Err(e) if e.is_unauthorized() => return Err(AuthError::Unauthorized),
                Err(e) if e.is_transport() => debug!(attempt, "Status poll failed: {e}"),
                Err(e) => {
                    return Err(AuthError::AuthStatusFailed {
                        code: e.status().map(i64::from).unwrap_or_default(),
                        description: e.to_string(),
                    });
                }
            }

            if started.elapsed() + self.config.poll_interval > self.config.poll_timeout {
                return Err(AuthError::AuthStatusTimeout {
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn redeem(&self, pending: &PendingAuthentication) -> Result<AccessSession, AuthError> {
        let response = self
            .client
            .redeem_token(&pending.authentication_token)
            .await
            .map_err(|e| AuthError::from_api(e, AuthError::RedemptionFailed))?;

        let access = response
            .access_token
            .ok_or_else(|| AuthError::RedemptionFailed("missing access token".into()))?;
        let token = access
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::RedemptionFailed("empty access token".into()))?;

        let expires_at = access.valid_until.as_deref().and_then(|raw| {
            let parsed = DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
            if parsed.is_none() {
                warn!(valid_until = raw, "Unparseable access token expiry");
            }
            parsed
        });

        Ok(AccessSession::new(token, expires_at))
    }

    fn transition(&self, next: AuthState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!(from = ?*state, to = ?next, "Auth state transition");
            *state = next;
        }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("base_url", &self.client.base_url())
            .field("state", &self.state())
            .field("session", &self.current())
            .finish()
    }
}
