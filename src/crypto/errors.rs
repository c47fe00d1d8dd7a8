use openssl::error::ErrorStack;
use thiserror::Error;

pub(crate) type CryptoResult<T> = Result<T, Error>;

/// Error type for cryptographic operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid data format or corrupted data
    #[error("Invalid data: {0}")]
    Invalid(String),

    /// The key is not an RSA key
    #[error("Unsupported key type: {0}")]
    UnsupportedKey(String),

    /// The plaintext does not fit into a single OAEP block
    #[error("Plaintext of {len} bytes exceeds the OAEP limit of {max} bytes")]
    PlaintextTooLong { len: usize, max: usize },

    /// Internal OpenSSL error
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
