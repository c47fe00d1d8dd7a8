//! KSeF token authentication.
//!
//! This module implements the challenge/response handshake that turns a long-lived API token into
//! a short-lived access credential, and keeps that credential fresh.
//!
//! # Features
//! - Certificate selection and challenge-bound RSA-OAEP token encryption
//! - Status polling with a bounded budget and optimistic redemption on timeout
//! - Single-flight authentication shared by concurrent callers
//! - Cancelable background refresh before expiry

mod errors;
pub mod refresh;
pub mod session;

pub use errors::AuthError;
pub use refresh::{RefreshConfig, RefreshOutcome, SessionRefresher};
pub use session::{AccessSession, AuthConfig, AuthSession, AuthState};
