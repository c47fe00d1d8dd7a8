use thiserror::Error;

use crate::ksef::ApiError;

/// Authentication failures, one per handshake step.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No usable KSeF token is configured")]
    MissingCredential,

    #[error("Public key certificate unavailable: {0}")]
    CertificateUnavailable(String),

    #[error("Authentication challenge unavailable: {0}")]
    ChallengeUnavailable(String),

    #[error("Token encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Authentication request rejected: {0}")]
    AuthSubmitRejected(String),

    #[error("Authentication status not ready after {waited_ms} ms")]
    AuthStatusTimeout { waited_ms: u64 },

    #[error("Authentication failed with status {code}: {description}")]
    AuthStatusFailed { code: i64, description: String },

    #[error("Token redemption failed: {0}")]
    RedemptionFailed(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("KSeF unreachable: {0}")]
    RemoteUnavailable(#[source] ApiError),
}

impl AuthError {
    /// Whether the failure looks transient (network or service side) rather than a bad token.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AuthError::CertificateUnavailable(_)
                | AuthError::ChallengeUnavailable(_)
                | AuthError::AuthStatusTimeout { .. }
                | AuthError::RedemptionFailed(_)
                | AuthError::RemoteUnavailable(_)
        )
    }

    /// Map an API error of a handshake step: transport failures become
    /// [`AuthError::RemoteUnavailable`], everything else goes through `step`.
    pub(crate) fn from_api(error: ApiError, step: impl FnOnce(String) -> AuthError) -> Self {
        if error.is_transport() {
            AuthError::RemoteUnavailable(error)
        } else {
            step(error.to_string())
        }
    }
}
