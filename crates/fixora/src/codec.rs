//! Reversible encryption for credentials at rest.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("ciphertext is not valid base64")]
    Encoding,

    #[error("ciphertext is truncated")]
    Truncated,

    #[error("ciphertext failed authentication")]
    Authentication,

    #[error("encryption failed")]
    Encryption,

    #[error("decrypted value is not valid utf-8")]
    Utf8,
}

/// Opaque encrypt/decrypt pair. Implementations must satisfy
/// `decrypt(encrypt(x)) == x` for every `x`.
#[cfg_attr(test, mockall::automock)]
pub trait SecretCodec: Send + Sync {
    fn encrypt(&self, plain: &str) -> Result<String, CodecError>;
    fn decrypt(&self, cipher: &str) -> Result<String, CodecError>;
}

/// AES-256-GCM with a fresh random nonce per value.
///
/// Output is `base64(nonce || ciphertext || tag)`.
pub struct AeadCodec {
    cipher: Aes256Gcm,
}

impl AeadCodec {
    /// Derive the key from an arbitrary secret string
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl SecretCodec for AeadCodec {
    fn encrypt(&self, plain: &str) -> Result<String, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain.as_bytes())
            .map_err(|_| CodecError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, cipher: &str) -> Result<String, CodecError> {
        let raw = STANDARD.decode(cipher).map_err(|_| CodecError::Encoding)?;
        if raw.len() <= NONCE_LEN {
            return Err(CodecError::Truncated);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Authentication)?;
        String::from_utf8(plain).map_err(|_| CodecError::Utf8)
    }
}
