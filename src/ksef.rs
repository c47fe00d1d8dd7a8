//! Client side of the KSeF REST API.
//!
//! # Contents
//! - [`KsefClient`]: typed calls for every endpoint the client consumes
//! - [`challenge`]: certificate selection and challenge-bound token encryption
//! - [`unwrap`]: normalisation of invoice response bodies (plain, JSON envelope, gzip, zip, base64)

pub mod challenge;
pub mod client;
mod errors;
pub mod models;
pub mod unwrap;

pub use client::{KsefClient, RawInvoice};
pub use errors::{ApiError, ApiResult};
pub use unwrap::{InvoicePayload, PayloadUnrecognized, decode_package, unwrap_response};
