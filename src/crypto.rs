mod errors;
pub mod rsa;

pub use errors::Error;
pub(crate) use errors::CryptoResult;
pub use rsa::RsaPublicKey;
