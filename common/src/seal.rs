// common/src/seal.rs
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("token is not valid base64: {0}")]
    Malformed(#[from] base64::DecodeError),
    #[error("token too short")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("token failed authentication")]
    Decrypt,
    #[error("could not encode plaintext: {0}")]
    Encoding(String),
}

/// Authenticated symmetric sealing of opaque bytes into a printable token
pub trait Sealer: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<String, SealError>;
    fn unseal(&self, token: &str) -> Result<Vec<u8>, SealError>;
}

/// ChaCha20-Poly1305 sealer; tokens are url-safe base64 of `nonce || ciphertext`
#[derive(Clone)]
pub struct ChaChaSealer {
    cipher: ChaCha20Poly1305,
}

impl ChaChaSealer {
    /// Derive the 256-bit key from an arbitrary secret string
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&digest)),
        }
    }
}

impl Sealer for ChaChaSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<String, SealError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SealError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn unseal(&self, token: &str) -> Result<Vec<u8>, SealError> {
        let raw = URL_SAFE_NO_PAD.decode(token.trim())?;
        if raw.len() <= NONCE_LEN {
            return Err(SealError::Truncated);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SealError::Decrypt)
    }
}
