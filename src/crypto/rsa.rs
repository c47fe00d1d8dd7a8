use crate::crypto::errors::{CryptoResult, Error};
use openssl::encrypt::Encrypter;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Public};
use openssl::rsa::Padding;
use openssl::x509::X509;
use std::fmt;

/// SHA-256 output size in bytes.
const DIGEST_LEN: usize = 32;

/// RSA public key wrapper used to encrypt challenge-bound tokens.
#[derive(Clone)]
pub struct RsaPublicKey {
    key: PKey<Public>,
}

impl RsaPublicKey {
    /// Load from a DER-encoded SubjectPublicKeyInfo.
    pub fn from_der(der_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        Self::from_pkey(PKey::public_key_from_der(der_bytes.as_ref())?)
    }

    /// Load from a PEM-encoded SubjectPublicKeyInfo.
    pub fn from_pem(pem_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        Self::from_pkey(PKey::public_key_from_pem(pem_bytes.as_ref())?)
    }

    /// Extract the subject key of a DER-encoded X.509 certificate.
    pub fn from_certificate_der(der_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let cert = X509::from_der(der_bytes.as_ref())?;
        Self::from_pkey(cert.public_key()?)
    }

    /// Extract the subject key of a PEM-encoded X.509 certificate.
    pub fn from_certificate_pem(pem_bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let cert = X509::from_pem(pem_bytes.as_ref())?;
        Self::from_pkey(cert.public_key()?)
    }

    /// Load a key from whatever encoding the bytes turn out to be.
    ///
    /// Tried in order: X.509 DER, X.509 PEM, SubjectPublicKeyInfo DER, SubjectPublicKeyInfo PEM.
    pub fn from_encoded(bytes: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let bytes = bytes.as_ref();
        if bytes.is_empty() {
            return Err(Error::Invalid("empty key material".into()));
        }

        if bytes.starts_with(b"-----BEGIN") {
            return Self::from_certificate_pem(bytes).or_else(|_| Self::from_pem(bytes));
        }

        match Self::from_certificate_der(bytes) {
            Err(Error::OpenSsl(_)) => Self::from_der(bytes),
            other => other,
        }
    }

    fn from_pkey(key: PKey<Public>) -> CryptoResult<Self> {
        if key.id() != Id::RSA {
            return Err(Error::UnsupportedKey(format!("{:?}", key.id())));
        }
        Ok(Self { key })
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> u32 {
        self.key.bits()
    }

    /// Largest plaintext a single OAEP block can carry.
    pub fn max_oaep_plaintext_len(&self) -> usize {
        let modulus_len = self.key.size();
        modulus_len.saturating_sub(2 * DIGEST_LEN + 2)
    }

    /// Encrypt with RSAES-OAEP, using SHA-256 for both the label digest and MGF1.
    ///
    /// The output is randomized: encrypting the same plaintext twice yields different ciphertexts.
    pub fn encrypt_oaep(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let max = self.max_oaep_plaintext_len();
        if plaintext.len() > max {
            return Err(Error::PlaintextTooLong {
                len: plaintext.len(),
                max,
            });
        }

        let md = MessageDigest::sha256();
        let mut encrypter = Encrypter::new(&self.key)?;
        encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        encrypter.set_rsa_oaep_md(md)?;
        encrypter.set_rsa_mgf1_md(md)?;

        let mut ciphertext = vec![0u8; encrypter.encrypt_len(plaintext)?];
        let written = encrypter.encrypt(plaintext, &mut ciphertext)?;
        ciphertext.truncate(written);
        Ok(ciphertext)
    }
}

impl fmt::Debug for RsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicKey")
            .field("bits", &self.bits())
            .finish()
    }
}
