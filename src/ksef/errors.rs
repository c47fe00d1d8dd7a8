use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned by [`KsefClient`](super::KsefClient) calls.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized request to {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Convenient Result type alias
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED.as_u16()),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            ApiError::InvalidResponse { .. } => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }

    /// The request never produced an HTTP response (connect, timeout, TLS).
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Http(e) if e.status().is_none() && !e.is_decode())
    }
}
